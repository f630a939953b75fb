//! Core data model of widget-sync: property values, schemas, the per-model
//! [`PropertyStore`], the [`Patch`] protocol, and the wire codecs that carry
//! patches between the host process and the browser document.

pub mod codec;
pub mod patch;
pub mod schema;
pub mod store;
pub mod value;

pub use codec::{
    CodecError, CreatePayload, DiagnosticPayload, Envelope, Frame, MessageKind, ModelId, ModelSpec, WireFormat,
};
pub use patch::{Patch, PatchError, PatchOp};
pub use schema::{PropertyKind, PropertySchema};
pub use store::{PropertyChange, PropertyStore, SubscriptionId};
