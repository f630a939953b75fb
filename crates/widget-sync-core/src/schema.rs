//! Declared property sets.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::model_ref;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    #[default]
    Any,
    Scalar,
    Sequence,
    Mapping,
    Reference,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Any => "any",
            PropertyKind::Scalar => "scalar",
            PropertyKind::Sequence => "sequence",
            PropertyKind::Mapping => "mapping",
            PropertyKind::Reference => "reference",
        }
    }

    /// Whether `value` may be stored in a property of this kind. `null` is
    /// accepted by every kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (PropertyKind::Any, _) => true,
            (PropertyKind::Scalar, v) => !v.is_array() && !v.is_object(),
            (PropertyKind::Sequence, v) => v.is_array(),
            (PropertyKind::Mapping, v) => v.is_object(),
            (PropertyKind::Reference, v) => model_ref(v).is_some(),
        }
    }

    pub fn allows_splice(&self) -> bool {
        matches!(self, PropertyKind::Any | PropertyKind::Sequence)
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered mapping from property name to its declared kind.
///
/// On the wire this is a plain object: `{"value": "scalar", "items": "sequence"}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySchema {
    props: IndexMap<String, PropertyKind>,
}

impl PropertySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, kind: PropertyKind) -> Self {
        self.props.insert(name.to_string(), kind);
        self
    }

    pub fn declare(&mut self, name: &str, kind: PropertyKind) {
        self.props.insert(name.to_string(), kind);
    }

    pub fn kind(&self, name: &str) -> Option<PropertyKind> {
        self.props.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.props.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Wire form, `{"name": "kind", ..}`.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.props
                .iter()
                .map(|(name, kind)| (name.clone(), Value::String(kind.as_str().to_string())))
                .collect(),
        )
    }
}

impl<S: Into<String>> FromIterator<(S, PropertyKind)> for PropertySchema {
    fn from_iter<I: IntoIterator<Item = (S, PropertyKind)>>(iter: I) -> Self {
        Self {
            props: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_accept_matching_shapes() {
        assert!(PropertyKind::Scalar.accepts(&json!(1)));
        assert!(!PropertyKind::Scalar.accepts(&json!([1])));
        assert!(PropertyKind::Sequence.accepts(&json!([])));
        assert!(PropertyKind::Mapping.accepts(&json!({"a": 1})));
        assert!(PropertyKind::Reference.accepts(&json!({"id": "m1"})));
        assert!(!PropertyKind::Reference.accepts(&json!("m1")));
        assert!(PropertyKind::Sequence.accepts(&Value::Null));
    }

    #[test]
    fn schema_deserializes_from_plain_object() {
        let schema: PropertySchema =
            serde_json::from_value(json!({"value": "scalar", "items": "sequence"})).unwrap();
        assert_eq!(schema.kind("items"), Some(PropertyKind::Sequence));
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["value", "items"]);
    }
}
