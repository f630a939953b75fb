//! Compact (positional array) patch form: `[op_code, target, ...args]`.

use serde_json::Value;

use super::{as_index, as_string, as_values, CodecError};
use crate::patch::{Patch, PatchOp};

pub fn encode_patch_compact(patch: &Patch) -> Value {
    let code = Value::from(patch.op().code());
    Value::Array(match patch {
        Patch::Set { prop, value } => vec![code, Value::String(prop.clone()), value.clone()],
        Patch::Insert {
            prop,
            index,
            values,
        } => vec![
            code,
            Value::String(prop.clone()),
            Value::from(*index),
            Value::Array(values.clone()),
        ],
        Patch::Remove { prop, index, count } => vec![
            code,
            Value::String(prop.clone()),
            Value::from(*index),
            Value::from(*count),
        ],
        Patch::Event { name, data } => vec![code, Value::String(name.clone()), data.clone()],
    })
}

pub fn decode_patch_compact(value: &Value) -> Result<Patch, CodecError> {
    let row = value.as_array().ok_or(CodecError::Expected("patch array"))?;
    let code = row
        .first()
        .and_then(Value::as_u64)
        .ok_or(CodecError::InvalidField("op"))?;
    let op = PatchOp::from_code(code).ok_or_else(|| CodecError::UnknownOp(code.to_string()))?;
    let arity = match op {
        PatchOp::Set | PatchOp::Event => 3,
        PatchOp::Insert | PatchOp::Remove => 4,
    };
    if row.len() != arity {
        return Err(CodecError::InvalidPayload(format!(
            "compact `{}` takes {} elements, got {}",
            op.as_str(),
            arity,
            row.len()
        )));
    }
    Ok(match op {
        PatchOp::Set => Patch::Set {
            prop: as_string(&row[1], "prop")?,
            value: row[2].clone(),
        },
        PatchOp::Insert => Patch::Insert {
            prop: as_string(&row[1], "prop")?,
            index: as_index(&row[2], "index")?,
            values: as_values(&row[3], "vals")?,
        },
        PatchOp::Remove => Patch::Remove {
            prop: as_string(&row[1], "prop")?,
            index: as_index(&row[2], "index")?,
            count: as_index(&row[3], "count")?,
        },
        PatchOp::Event => Patch::Event {
            name: as_string(&row[1], "name")?,
            data: row[2].clone(),
        },
    })
}
