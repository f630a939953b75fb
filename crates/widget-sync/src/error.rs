use thiserror::Error;
use widget_sync_core::{CodecError, ModelId, PatchError};
use widget_sync_dom::DomError;
use widget_sync_template::CompileError;

use crate::{ChannelId, MountId};

/// Failure reported by a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("transport is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure raised by a view adapter or view instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("{0}")]
    Render(String),
    #[error(transparent)]
    Template(#[from] CompileError),
    #[error(transparent)]
    Dom(#[from] DomError),
}

/// Everything the comm manager can report. Errors local to one model never
/// affect other models; they are logged and turned into diagnostics.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("channel `{0}` is closed")]
    ChannelClosed(ChannelId),
    #[error("unknown channel `{0}`")]
    UnknownChannel(ChannelId),
    #[error("unknown model `{0}`")]
    UnknownModel(ModelId),
    #[error("model `{0}` already exists")]
    DuplicateModel(ModelId),
    #[error("patch for `{model_id}` is out of range: {source}")]
    PatchOutOfRange { model_id: ModelId, source: PatchError },
    #[error("patch for `{model_id}` does not match its schema: {source}")]
    SchemaMismatch { model_id: ModelId, source: PatchError },
    #[error("no view registered for type `{0}`")]
    UnknownViewType(String),
    #[error("unknown mount `{0}`")]
    UnknownMount(MountId),
    #[error("view of `{model_id}` failed: {source}")]
    ViewAdapter { model_id: ModelId, source: ViewError },
    #[error("sequence gap for `{model_id}`: skipped {from}..{to}")]
    SequenceGap { model_id: ModelId, from: u64, to: u64 },
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl SyncError {
    /// Classifies a rejected patch for `model_id`.
    pub fn from_patch(model_id: &str, err: PatchError) -> Self {
        let model_id = model_id.to_string();
        if err.is_out_of_range() {
            SyncError::PatchOutOfRange {
                model_id,
                source: err,
            }
        } else {
            SyncError::SchemaMismatch {
                model_id,
                source: err,
            }
        }
    }

    /// Stable identifier sent to the host in diagnostic messages.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::ChannelClosed(_) => "channel_closed",
            SyncError::UnknownChannel(_) => "unknown_channel",
            SyncError::UnknownModel(_) => "unknown_model",
            SyncError::DuplicateModel(_) => "duplicate_model",
            SyncError::PatchOutOfRange { .. } => "patch_out_of_range",
            SyncError::SchemaMismatch { .. } => "schema_mismatch",
            SyncError::UnknownViewType(_) => "unknown_view_type",
            SyncError::UnknownMount(_) => "unknown_mount",
            SyncError::ViewAdapter { .. } => "view_adapter_error",
            SyncError::SequenceGap { .. } => "sequence_gap",
            SyncError::FrameTooLarge { .. } => "frame_too_large",
            SyncError::Codec(_) => "codec_error",
            SyncError::Channel(ChannelError::Closed) => "channel_closed",
            SyncError::Channel(ChannelError::Transport(_)) => "transport_error",
        }
    }

    /// The model the error is about, when there is one.
    pub fn model_id(&self) -> Option<&str> {
        match self {
            SyncError::UnknownModel(id) | SyncError::DuplicateModel(id) => Some(id),
            SyncError::PatchOutOfRange { model_id, .. }
            | SyncError::SchemaMismatch { model_id, .. }
            | SyncError::ViewAdapter { model_id, .. }
            | SyncError::SequenceGap { model_id, .. } => Some(model_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_errors_are_classified() {
        let out = SyncError::from_patch(
            "w1",
            PatchError::OutOfRange {
                prop: "items".into(),
                index: 9,
                len: 2,
            },
        );
        assert_eq!(out.code(), "patch_out_of_range");
        assert_eq!(out.model_id(), Some("w1"));

        let schema = SyncError::from_patch("w1", PatchError::UnknownProperty("nope".into()));
        assert_eq!(schema.code(), "schema_mismatch");
    }

    #[test]
    fn channel_errors_keep_their_code() {
        assert_eq!(SyncError::from(ChannelError::Closed).code(), "channel_closed");
        let transport = SyncError::from(ChannelError::from(TransportError::Closed));
        assert_eq!(transport.code(), "transport_error");
        assert_eq!(transport.model_id(), None);
    }
}
