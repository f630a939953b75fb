//! Synchronizes widget models between a host process and a browser document.
//!
//! The host owns the authoritative state of every model and sends
//! `create`/`patch`/`event`/`dispose` messages over a [`Channel`]. The
//! [`CommManager`] keeps a [`widget_sync_core::PropertyStore`] per model,
//! applies patches in order, and keeps the views rendered by
//! [`ViewAdapter`]s up to date with minimal DOM updates. Changes made in the
//! browser travel back as patches and events on the same channel.
//!
//! ```
//! use serde_json::json;
//! use widget_sync::{CommManager, LoopbackTransport, SyncConfig, TemplateView, ViewRegistry};
//! use widget_sync_core::{CreatePayload, Envelope, Patch};
//!
//! let bar = TemplateView::compile(r#"<progress value="${value}" max="${max}"></progress>"#, &["value", "max"]).unwrap();
//! let mut manager = CommManager::init(SyncConfig::default(), ViewRegistry::new().with("ProgressBar", bar));
//! manager.mount_point("main").unwrap();
//!
//! let (host, browser) = LoopbackTransport::pair();
//! manager.connect("kernel", browser);
//! manager.dispatch("kernel", Envelope::create("p1", &CreatePayload {
//!     mount: Some("main".into()),
//!     ..CreatePayload::new("ProgressBar", json!({"value": 0, "max": 100}).as_object().unwrap().clone())
//! })).unwrap();
//! manager.dispatch("kernel", Envelope::patch("p1", &[Patch::set("value", json!(42))])).unwrap();
//!
//! let mount = manager.mount("main").unwrap();
//! assert_eq!(manager.dom().inner_html(mount), r#"<progress value="42" max="100"></progress>"#);
//! # drop(host);
//! ```

pub mod binder;
pub mod channel;
pub mod config;
mod error;
pub mod logging;
mod manager;
pub mod reconnect;
pub mod sequencer;
pub mod template_view;
pub mod transport;

pub use binder::{
    Binder, BindingKey, BindingState, ViewAction, ViewAdapter, ViewContext, ViewInstance,
    ViewRegistry,
};
pub use channel::{Channel, ChannelEvent, ChannelState, CommChannel, HandlerId};
pub use config::{ConfigError, ReconnectStrategy, SyncConfig};
pub use error::{ChannelError, SyncError, TransportError, ViewError};
pub use manager::{CommManager, Diagnostic};
pub use reconnect::{ExponentialBackoff, FixedInterval, NoReconnect, ReconnectPolicy};
pub use template_view::TemplateView;
pub use transport::{LoopbackTransport, QueueHandle, QueueTransport, Transport};

/// Name of a registered channel.
pub type ChannelId = String;
/// Name of a registered mount point.
pub type MountId = String;
