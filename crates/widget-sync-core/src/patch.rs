//! Property patches and their application to a single value.

use serde_json::Value;
use thiserror::Error;

use crate::schema::PropertyKind;

/// One atomic change against a model.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Replace the whole value of `prop`.
    Set { prop: String, value: Value },
    /// Splice `values` into the sequence `prop` before `index`.
    Insert {
        prop: String,
        index: usize,
        values: Vec<Value>,
    },
    /// Remove `count` items of the sequence `prop` starting at `index`.
    Remove {
        prop: String,
        index: usize,
        count: usize,
    },
    /// Transient notification; forwarded to listeners, never stored.
    Event { name: String, data: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Set,
    Insert,
    Remove,
    Event,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Set => "set",
            PatchOp::Insert => "insert",
            PatchOp::Remove => "remove",
            PatchOp::Event => "event",
        }
    }

    /// Numeric tag used by the compact codec.
    pub fn code(&self) -> u64 {
        match self {
            PatchOp::Set => 0,
            PatchOp::Insert => 1,
            PatchOp::Remove => 2,
            PatchOp::Event => 3,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "set" => Some(PatchOp::Set),
            "insert" => Some(PatchOp::Insert),
            "remove" => Some(PatchOp::Remove),
            "event" => Some(PatchOp::Event),
            _ => None,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(PatchOp::Set),
            1 => Some(PatchOp::Insert),
            2 => Some(PatchOp::Remove),
            3 => Some(PatchOp::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("unknown property `{0}`")]
    UnknownProperty(String),
    #[error("property `{prop}` does not accept this value (declared {expected})")]
    KindMismatch { prop: String, expected: PropertyKind },
    #[error("property `{0}` is not a sequence")]
    NotASequence(String),
    #[error("index {index} out of range for `{prop}` (len {len})")]
    OutOfRange {
        prop: String,
        index: usize,
        len: usize,
    },
}

impl PatchError {
    /// `true` for index errors, `false` for schema violations.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, PatchError::OutOfRange { .. })
    }
}

impl Patch {
    pub fn set(prop: &str, value: Value) -> Self {
        Patch::Set {
            prop: prop.to_string(),
            value,
        }
    }

    pub fn insert(prop: &str, index: usize, values: Vec<Value>) -> Self {
        Patch::Insert {
            prop: prop.to_string(),
            index,
            values,
        }
    }

    pub fn remove(prop: &str, index: usize, count: usize) -> Self {
        Patch::Remove {
            prop: prop.to_string(),
            index,
            count,
        }
    }

    pub fn event(name: &str, data: Value) -> Self {
        Patch::Event {
            name: name.to_string(),
            data,
        }
    }

    pub fn op(&self) -> PatchOp {
        match self {
            Patch::Set { .. } => PatchOp::Set,
            Patch::Insert { .. } => PatchOp::Insert,
            Patch::Remove { .. } => PatchOp::Remove,
            Patch::Event { .. } => PatchOp::Event,
        }
    }

    /// Target property; `None` for events.
    pub fn prop(&self) -> Option<&str> {
        match self {
            Patch::Set { prop, .. } | Patch::Insert { prop, .. } | Patch::Remove { prop, .. } => {
                Some(prop)
            }
            Patch::Event { .. } => None,
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Patch::Event { .. })
    }

    /// Computes the value `prop` holds after this patch, given its current
    /// value. `current` is left untouched; events return `Ok(None)`.
    ///
    /// A missing sequence behaves as an empty one.
    pub fn apply_to(
        &self,
        current: Option<&Value>,
        kind: PropertyKind,
    ) -> Result<Option<Value>, PatchError> {
        match self {
            Patch::Set { prop, value } => {
                if !kind.accepts(value) {
                    return Err(PatchError::KindMismatch {
                        prop: prop.clone(),
                        expected: kind,
                    });
                }
                Ok(Some(value.clone()))
            }
            Patch::Insert {
                prop,
                index,
                values,
            } => {
                let mut items = sequence(prop, current, kind)?;
                if *index > items.len() {
                    return Err(PatchError::OutOfRange {
                        prop: prop.clone(),
                        index: *index,
                        len: items.len(),
                    });
                }
                items.splice(*index..*index, values.iter().cloned());
                Ok(Some(Value::Array(items)))
            }
            Patch::Remove { prop, index, count } => {
                let mut items = sequence(prop, current, kind)?;
                let end = index.saturating_add(*count);
                if end > items.len() {
                    return Err(PatchError::OutOfRange {
                        prop: prop.clone(),
                        index: end,
                        len: items.len(),
                    });
                }
                items.drain(*index..end);
                Ok(Some(Value::Array(items)))
            }
            Patch::Event { .. } => Ok(None),
        }
    }
}

fn sequence(
    prop: &str,
    current: Option<&Value>,
    kind: PropertyKind,
) -> Result<Vec<Value>, PatchError> {
    if !kind.allows_splice() {
        return Err(PatchError::NotASequence(prop.to_string()));
    }
    match current {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(PatchError::NotASequence(prop.to_string())),
    }
}
