//! Verbose (self-describing object) patch form.

use serde_json::{Map, Value};

use super::{as_index, as_string, as_values, CodecError};
use crate::patch::{Patch, PatchOp};

pub fn encode_patch_verbose(patch: &Patch) -> Value {
    let mut row = Map::new();
    row.insert("op".to_string(), Value::String(patch.op().as_str().to_string()));
    match patch {
        Patch::Set { prop, value } => {
            row.insert("prop".to_string(), Value::String(prop.clone()));
            row.insert("val".to_string(), value.clone());
        }
        Patch::Insert {
            prop,
            index,
            values,
        } => {
            row.insert("prop".to_string(), Value::String(prop.clone()));
            row.insert("index".to_string(), Value::from(*index));
            row.insert("vals".to_string(), Value::Array(values.clone()));
        }
        Patch::Remove { prop, index, count } => {
            row.insert("prop".to_string(), Value::String(prop.clone()));
            row.insert("index".to_string(), Value::from(*index));
            row.insert("count".to_string(), Value::from(*count));
        }
        Patch::Event { name, data } => {
            row.insert("name".to_string(), Value::String(name.clone()));
            row.insert("data".to_string(), data.clone());
        }
    }
    Value::Object(row)
}

pub fn decode_patch_verbose(value: &Value) -> Result<Patch, CodecError> {
    let row = value.as_object().ok_or(CodecError::Expected("patch object"))?;
    let field = |name: &'static str| row.get(name).ok_or(CodecError::MissingField(name));
    let op_name = field("op")?.as_str().ok_or(CodecError::InvalidField("op"))?;
    let op = PatchOp::from_name(op_name).ok_or_else(|| CodecError::UnknownOp(op_name.to_string()))?;
    Ok(match op {
        PatchOp::Set => Patch::Set {
            prop: as_string(field("prop")?, "prop")?,
            // An absent value is an explicit reset to null.
            value: row.get("val").cloned().unwrap_or(Value::Null),
        },
        PatchOp::Insert => Patch::Insert {
            prop: as_string(field("prop")?, "prop")?,
            index: as_index(field("index")?, "index")?,
            values: as_values(field("vals")?, "vals")?,
        },
        PatchOp::Remove => Patch::Remove {
            prop: as_string(field("prop")?, "prop")?,
            index: as_index(field("index")?, "index")?,
            count: match row.get("count") {
                Some(v) => as_index(v, "count")?,
                None => 1,
            },
        },
        PatchOp::Event => Patch::Event {
            name: as_string(field("name")?, "name")?,
            data: row.get("data").cloned().unwrap_or(Value::Null),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_scenario_set() {
        let p = decode_patch_verbose(&json!({"op": "set", "prop": "value", "val": 42})).unwrap();
        assert_eq!(p, Patch::set("value", json!(42)));
    }

    #[test]
    fn remove_count_defaults_to_one() {
        let p = decode_patch_verbose(&json!({"op": "remove", "prop": "xs", "index": 3})).unwrap();
        assert_eq!(p, Patch::remove("xs", 3, 1));
    }

    #[test]
    fn rejects_unknown_op_and_bad_fields() {
        assert_eq!(
            decode_patch_verbose(&json!({"op": "merge", "prop": "x"})),
            Err(CodecError::UnknownOp("merge".into()))
        );
        assert_eq!(
            decode_patch_verbose(&json!({"op": "insert", "prop": "x", "index": -1, "vals": []})),
            Err(CodecError::InvalidField("index"))
        );
        assert_eq!(
            decode_patch_verbose(&json!({"op": "insert", "prop": "x", "index": 0})),
            Err(CodecError::MissingField("vals"))
        );
    }
}
