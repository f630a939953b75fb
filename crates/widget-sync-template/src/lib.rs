//! Reactive HTML templates for widget-sync views.
//!
//! A template is compiled once ([`compile`]) into a plan of bound locations:
//! text nodes, attribute values, list blocks and conditional blocks, each
//! indexed by the property names it reads. [`instantiate`] renders the plan
//! into a [`widget_sync_dom::Dom`]; [`TemplateHandle::update`] then revisits
//! only the locations bound to the names that changed.

mod cache;
mod compile;
mod expr;
mod instance;
mod parse;

use thiserror::Error;

pub use cache::TemplateCache;
pub use compile::{compile, CompiledTemplate};
pub use expr::Values;
pub use instance::{instantiate, instantiate_with_owner, new_owner, TemplateHandle};

/// Template compilation failure. Offsets are byte positions in the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unclosed {what} at byte {offset}")]
    Unclosed { what: String, offset: usize },
    #[error("expected </{expected}> but found </{found}> at byte {offset}")]
    MismatchedTag {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("unexpected {what} at byte {offset}")]
    Unexpected { what: String, offset: usize },
    #[error("invalid expression `{expr}` at byte {offset}")]
    InvalidExpression { expr: String, offset: usize },
    #[error("invalid block tag `{tag}` at byte {offset}")]
    InvalidBlock { tag: String, offset: usize },
    #[error("`{name}` is not bound (byte {offset})")]
    UnboundName { name: String, offset: usize },
    #[error("event attribute `{attr}` needs a plain handler name (byte {offset})")]
    InvalidHandler { attr: String, offset: usize },
}

impl CompileError {
    pub fn offset(&self) -> usize {
        match self {
            CompileError::Unclosed { offset, .. }
            | CompileError::MismatchedTag { offset, .. }
            | CompileError::Unexpected { offset, .. }
            | CompileError::InvalidExpression { offset, .. }
            | CompileError::InvalidBlock { offset, .. }
            | CompileError::UnboundName { offset, .. }
            | CompileError::InvalidHandler { offset, .. } => *offset,
        }
    }
}
