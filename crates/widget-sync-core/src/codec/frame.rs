//! Transport frames: JSON text or CBOR binary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_envelope, encode_envelope, CodecError, Envelope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    Cbor,
}

pub fn encode_frame(env: &Envelope, format: WireFormat) -> Result<Frame, CodecError> {
    let value = encode_envelope(env);
    match format {
        WireFormat::Json => Ok(Frame::Text(serde_json::to_string(&value)?)),
        WireFormat::Cbor => {
            let mut out = Vec::new();
            ciborium::into_writer(&value, &mut out)
                .map_err(|e| CodecError::InvalidCbor(e.to_string()))?;
            Ok(Frame::Binary(out))
        }
    }
}

/// Decodes either frame type; the format is implied by the frame.
pub fn decode_frame(frame: &Frame) -> Result<Envelope, CodecError> {
    let value: Value = match frame {
        Frame::Text(text) => serde_json::from_str(text)?,
        Frame::Binary(bytes) => ciborium::from_reader(bytes.as_slice())
            .map_err(|e| CodecError::InvalidCbor(e.to_string()))?,
    };
    decode_envelope(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Patch;
    use serde_json::json;

    #[test]
    fn cbor_frame_roundtrips() {
        let env = Envelope::patch(
            "w1",
            &[
                Patch::set("value", json!(42)),
                Patch::insert("xs", 0, vec![json!("a"), json!(null)]),
            ],
        )
        .with_seq(9);
        let frame = encode_frame(&env, WireFormat::Cbor).unwrap();
        assert!(matches!(frame, Frame::Binary(_)));
        assert_eq!(decode_frame(&frame).unwrap(), env);
    }

    #[test]
    fn json_frame_is_plain_text() {
        let frame = encode_frame(&Envelope::dispose("w1"), WireFormat::Json).unwrap();
        assert_eq!(
            frame,
            Frame::Text(r#"{"modelId":"w1","kind":"dispose"}"#.to_string())
        );
    }

    #[test]
    fn garbage_frames_are_codec_errors() {
        assert!(matches!(
            decode_frame(&Frame::Text("{not json".into())),
            Err(CodecError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_frame(&Frame::Binary(vec![0xff, 0x00])),
            Err(CodecError::InvalidCbor(_))
        ));
    }
}
