//! Helpers over property values.
//!
//! Values are plain `serde_json::Value`s. A reference to another model is an
//! object with the single key `"id"`, e.g. `{"id": "p1001"}`.

use serde_json::{Map, Value};

const REF_KEY: &str = "id";

/// Returns the referenced model id when `value` is a model reference.
pub fn model_ref(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(REF_KEY)?.as_str(),
        _ => None,
    }
}

pub fn make_ref(id: &str) -> Value {
    let mut map = Map::new();
    map.insert(REF_KEY.to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

/// Every model id referenced anywhere inside `value`, depth-first, without
/// duplicates.
pub fn collect_refs(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk_refs(value, &mut out);
    out
}

fn walk_refs(value: &Value, out: &mut Vec<String>) {
    if let Some(id) = model_ref(value) {
        if !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| walk_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| walk_refs(v, out)),
        _ => {}
    }
}

/// Text form of a value as it appears in rendered markup.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Truthiness used by conditional blocks: `null`, `false`, `0`, `""`, `[]`
/// and `{}` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognises_single_key_id_objects_only() {
        assert_eq!(model_ref(&json!({"id": "p1"})), Some("p1"));
        assert_eq!(model_ref(&json!({"id": "p1", "x": 1})), None);
        assert_eq!(model_ref(&json!({"id": 3})), None);
        assert_eq!(model_ref(&make_ref("w9")), Some("w9"));
    }

    #[test]
    fn collects_nested_refs_once() {
        let v = json!({"a": [{"id": "x"}, {"id": "y"}], "b": {"c": {"id": "x"}}});
        assert_eq!(collect_refs(&v), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn display_renders_scalars_plainly() {
        assert_eq!(display(&json!(null)), "");
        assert_eq!(display(&json!("hi")), "hi");
        assert_eq!(display(&json!(42)), "42");
        assert_eq!(display(&json!(true)), "true");
        assert_eq!(display(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{falsy} must be falsy");
        }
        for truthy in [json!(true), json!(0.5), json!("x"), json!([0]), json!({"a": 0})] {
            assert!(is_truthy(&truthy), "{truthy} must be truthy");
        }
    }
}
