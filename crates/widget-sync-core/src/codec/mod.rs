//! Wire codecs.
//!
//! Patches have two JSON shapes, both accepted by [`decode_patch`]:
//!
//! | Form | Example |
//! |------|---------|
//! | verbose | `{"op":"set","prop":"value","val":42}` |
//! | compact | `[0,"value",42]` |
//!
//! Envelopes wrap a payload with the target model id and message kind, and
//! travel as JSON text frames or CBOR binary frames.

mod compact;
mod envelope;
mod frame;
mod verbose;

use serde_json::Value;
use thiserror::Error;

use crate::patch::Patch;

pub use compact::{decode_patch_compact, encode_patch_compact};
pub use envelope::{
    decode_envelope, encode_envelope, CreatePayload, DiagnosticPayload, Envelope, MessageKind,
    ModelId, ModelSpec,
};
pub use frame::{decode_frame, encode_frame, Frame, WireFormat};
pub use verbose::{decode_patch_verbose, encode_patch_verbose};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid CBOR: {0}")]
    InvalidCbor(String),
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
    #[error("unknown patch op: {0}")]
    UnknownOp(String),
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::InvalidJson(err.to_string())
    }
}

/// Encodes a patch in the verbose form.
pub fn encode_patch(patch: &Patch) -> Value {
    encode_patch_verbose(patch)
}

/// Decodes a patch in either form.
pub fn decode_patch(value: &Value) -> Result<Patch, CodecError> {
    match value {
        Value::Object(_) => decode_patch_verbose(value),
        Value::Array(_) => decode_patch_compact(value),
        _ => Err(CodecError::Expected("patch object or array")),
    }
}

/// Encodes a batch: a single patch stays a bare verbose object, anything else
/// becomes an array of verbose objects.
pub fn encode_patch_batch(patches: &[Patch]) -> Value {
    match patches {
        [single] => encode_patch_verbose(single),
        many => Value::Array(many.iter().map(encode_patch_verbose).collect()),
    }
}

/// Decodes a patch payload: one patch (either form) or an array of patches.
///
/// An array whose first element is a number is a single compact patch.
pub fn decode_patch_batch(value: &Value) -> Result<Vec<Patch>, CodecError> {
    match value {
        Value::Object(_) => Ok(vec![decode_patch_verbose(value)?]),
        Value::Array(items) => match items.first() {
            Some(Value::Number(_)) => Ok(vec![decode_patch_compact(value)?]),
            _ => items.iter().map(decode_patch).collect(),
        },
        _ => Err(CodecError::Expected("patch or patch array")),
    }
}

// ── field helpers shared by the codecs ────────────────────────────────────

pub(crate) fn as_index(v: &Value, field: &'static str) -> Result<usize, CodecError> {
    v.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or(CodecError::InvalidField(field))
}

pub(crate) fn as_string(v: &Value, field: &'static str) -> Result<String, CodecError> {
    v.as_str()
        .map(str::to_string)
        .ok_or(CodecError::InvalidField(field))
}

pub(crate) fn as_values(v: &Value, field: &'static str) -> Result<Vec<Value>, CodecError> {
    v.as_array().cloned().ok_or(CodecError::InvalidField(field))
}
