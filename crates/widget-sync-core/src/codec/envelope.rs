//! Message envelope: `{"modelId", "kind", "payload", "seq"?}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{decode_patch_batch, encode_patch_batch, encode_patch_verbose, CodecError};
use crate::patch::Patch;
use crate::schema::PropertySchema;

pub type ModelId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Create,
    Patch,
    Event,
    Dispose,
    /// Browser-to-host error report.
    Diagnostic,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Create => "create",
            MessageKind::Patch => "patch",
            MessageKind::Event => "event",
            MessageKind::Dispose => "dispose",
            MessageKind::Diagnostic => "diagnostic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "create" => Some(MessageKind::Create),
            "patch" => Some(MessageKind::Patch),
            "event" => Some(MessageKind::Event),
            "dispose" => Some(MessageKind::Dispose),
            "diagnostic" => Some(MessageKind::Diagnostic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub model_id: ModelId,
    pub kind: MessageKind,
    pub payload: Value,
    /// Per-model sequence number, present when the transport may reorder.
    pub seq: Option<u64>,
}

/// One model announced by a `create` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: ModelId,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<PropertySchema>,
}

/// Payload of a `create` message. `references` are created before the
/// model itself so that its reference-valued properties resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePayload {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<PropertySchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ModelSpec>,
}

impl ModelSpec {
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        root.insert("id".to_string(), Value::String(self.id.clone()));
        insert_model_fields(&mut root, &self.type_tag, &self.props, self.schema.as_ref());
        Value::Object(root)
    }
}

fn insert_model_fields(
    root: &mut Map<String, Value>,
    type_tag: &str,
    props: &Map<String, Value>,
    schema: Option<&PropertySchema>,
) {
    root.insert("type".to_string(), Value::String(type_tag.to_string()));
    root.insert("props".to_string(), Value::Object(props.clone()));
    if let Some(schema) = schema {
        root.insert("schema".to_string(), schema.to_value());
    }
}

impl CreatePayload {
    pub fn new(type_tag: &str, props: Map<String, Value>) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            props,
            schema: None,
            mount: None,
            references: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        insert_model_fields(&mut root, &self.type_tag, &self.props, self.schema.as_ref());
        if let Some(mount) = &self.mount {
            root.insert("mount".to_string(), Value::String(mount.clone()));
        }
        if !self.references.is_empty() {
            let refs = self.references.iter().map(ModelSpec::to_value).collect();
            root.insert("references".to_string(), Value::Array(refs));
        }
        Value::Object(root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticPayload {
    pub code: String,
    pub message: String,
}

impl Envelope {
    pub fn new(model_id: &str, kind: MessageKind, payload: Value) -> Self {
        Self {
            model_id: model_id.to_string(),
            kind,
            payload,
            seq: None,
        }
    }

    pub fn create(model_id: &str, payload: &CreatePayload) -> Self {
        Self::new(model_id, MessageKind::Create, payload.to_value())
    }

    pub fn patch(model_id: &str, patches: &[Patch]) -> Self {
        Self::new(model_id, MessageKind::Patch, encode_patch_batch(patches))
    }

    pub fn event(model_id: &str, name: &str, data: Value) -> Self {
        Self::new(
            model_id,
            MessageKind::Event,
            encode_patch_verbose(&Patch::event(name, data)),
        )
    }

    pub fn dispose(model_id: &str) -> Self {
        Self::new(model_id, MessageKind::Dispose, Value::Null)
    }

    pub fn diagnostic(model_id: &str, code: &str, message: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("code".to_string(), Value::String(code.to_string()));
        payload.insert("message".to_string(), Value::String(message.to_string()));
        Self::new(model_id, MessageKind::Diagnostic, Value::Object(payload))
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn create_payload(&self) -> Result<CreatePayload, CodecError> {
        self.expect_kind(MessageKind::Create)?;
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))
    }

    /// Patches carried by a `patch` message; an `event` message yields its
    /// single event patch.
    pub fn patches(&self) -> Result<Vec<Patch>, CodecError> {
        match self.kind {
            MessageKind::Patch | MessageKind::Event => decode_patch_batch(&self.payload),
            _ => Err(CodecError::InvalidPayload(format!(
                "`{}` message carries no patches",
                self.kind.as_str()
            ))),
        }
    }

    pub fn diagnostic_payload(&self) -> Result<DiagnosticPayload, CodecError> {
        self.expect_kind(MessageKind::Diagnostic)?;
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))
    }

    fn expect_kind(&self, kind: MessageKind) -> Result<(), CodecError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(CodecError::InvalidPayload(format!(
                "expected `{}` message, got `{}`",
                kind.as_str(),
                self.kind.as_str()
            )))
        }
    }
}

pub fn encode_envelope(env: &Envelope) -> Value {
    let mut root = Map::new();
    root.insert("modelId".to_string(), Value::String(env.model_id.clone()));
    root.insert("kind".to_string(), Value::String(env.kind.as_str().to_string()));
    if !env.payload.is_null() {
        root.insert("payload".to_string(), env.payload.clone());
    }
    if let Some(seq) = env.seq {
        root.insert("seq".to_string(), Value::from(seq));
    }
    Value::Object(root)
}

/// Decodes an envelope. Besides the canonical shape, a flattened patch
/// (`{"modelId":"w1","op":"set","prop":"value","val":42}`) is accepted as a
/// single-patch message.
pub fn decode_envelope(value: &Value) -> Result<Envelope, CodecError> {
    let root = value.as_object().ok_or(CodecError::Expected("envelope object"))?;
    let model_id = root
        .get("modelId")
        .ok_or(CodecError::MissingField("modelId"))?
        .as_str()
        .ok_or(CodecError::InvalidField("modelId"))?
        .to_string();
    let seq = match root.get("seq") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64().ok_or(CodecError::InvalidField("seq"))?),
    };

    if !root.contains_key("kind") && root.contains_key("op") {
        let mut flat = root.clone();
        flat.remove("modelId");
        flat.remove("seq");
        let patch = decode_patch_batch(&Value::Object(flat))?;
        let kind = match patch.as_slice() {
            [p] if p.is_event() => MessageKind::Event,
            _ => MessageKind::Patch,
        };
        return Ok(Envelope {
            model_id,
            kind,
            payload: encode_patch_batch(&patch),
            seq,
        });
    }

    let kind_name = root
        .get("kind")
        .ok_or(CodecError::MissingField("kind"))?
        .as_str()
        .ok_or(CodecError::InvalidField("kind"))?;
    let kind = MessageKind::from_name(kind_name)
        .ok_or_else(|| CodecError::UnknownKind(kind_name.to_string()))?;
    Ok(Envelope {
        model_id,
        kind,
        payload: root.get("payload").cloned().unwrap_or(Value::Null),
        seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattened_patch_is_accepted() {
        let env = decode_envelope(&json!({
            "modelId": "w1", "op": "set", "prop": "value", "val": 42
        }))
        .unwrap();
        assert_eq!(env.kind, MessageKind::Patch);
        assert_eq!(env.patches().unwrap(), vec![Patch::set("value", json!(42))]);
    }

    #[test]
    fn flattened_event_becomes_event_kind() {
        let env = decode_envelope(&json!({
            "modelId": "w1", "op": "event", "name": "click", "data": 1
        }))
        .unwrap();
        assert_eq!(env.kind, MessageKind::Event);
    }

    #[test]
    fn create_payload_parses_type_and_references() {
        let env = decode_envelope(&json!({
            "modelId": "w1",
            "kind": "create",
            "payload": {
                "type": "ProgressBar",
                "props": {"value": 0, "max": 100},
                "mount": "main",
                "references": [{"id": "t1", "type": "Theme", "props": {}}]
            }
        }))
        .unwrap();
        let create = env.create_payload().unwrap();
        assert_eq!(create.type_tag, "ProgressBar");
        assert_eq!(create.mount.as_deref(), Some("main"));
        assert_eq!(create.references[0].id, "t1");
    }

    #[test]
    fn missing_and_unknown_kind_are_errors() {
        assert_eq!(
            decode_envelope(&json!({"modelId": "w1"})),
            Err(CodecError::MissingField("kind"))
        );
        assert_eq!(
            decode_envelope(&json!({"modelId": "w1", "kind": "explode"})),
            Err(CodecError::UnknownKind("explode".into()))
        );
        assert_eq!(
            decode_envelope(&json!({"kind": "dispose"})),
            Err(CodecError::MissingField("modelId"))
        );
    }

    #[test]
    fn dispose_omits_payload() {
        let encoded = encode_envelope(&Envelope::dispose("w1").with_seq(4));
        assert_eq!(encoded, json!({"modelId": "w1", "kind": "dispose", "seq": 4}));
        assert_eq!(decode_envelope(&encoded).unwrap(), Envelope::dispose("w1").with_seq(4));
    }

    #[test]
    fn create_and_diagnostic_payloads_are_built_field_by_field() {
        let mut payload = CreatePayload::new("Slider", json!({"value": 3}).as_object().cloned().unwrap());
        payload.schema = Some(PropertySchema::new().with("value", crate::schema::PropertyKind::Scalar));
        payload.mount = Some("main".into());
        payload.references.push(ModelSpec {
            id: "t1".into(),
            type_tag: "Theme".into(),
            props: Map::new(),
            schema: None,
        });
        let env = Envelope::create("s1", &payload);
        assert_eq!(
            env.payload,
            json!({
                "type": "Slider",
                "props": {"value": 3},
                "schema": {"value": "scalar"},
                "mount": "main",
                "references": [{"id": "t1", "type": "Theme", "props": {}}]
            })
        );
        assert_eq!(env.create_payload().unwrap(), payload);

        let diag = Envelope::diagnostic("s1", "unknown_model", "gone");
        assert_eq!(diag.payload, json!({"code": "unknown_model", "message": "gone"}));
        assert_eq!(diag.diagnostic_payload().unwrap().code, "unknown_model");
    }

    #[test]
    fn patches_of_a_dispose_is_an_error() {
        assert!(Envelope::dispose("w1").patches().is_err());
    }
}
