//! Message Envelope Codec
//!
//! Every asynchronous notification from the intermediary is a
//! `{status, message}` object. The status tag is passed through verbatim;
//! consumers treat anything other than `success` as an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::Frame;
use crate::{Category, DroneCommand};

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

/// Errors that can occur while decoding an envelope
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Envelope decode error on {category}: {reason}")]
    EnvelopeDecodeError { category: Category, reason: String },
}

impl EnvelopeError {
    fn new(category: Category, reason: impl Into<String>) -> Self {
        EnvelopeError::EnvelopeDecodeError {
            category,
            reason: reason.into(),
        }
    }
}

/// Decoded inbound notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEnvelope {
    /// Channel the envelope arrived on
    pub category: Category,
    pub status: String,
    pub message: String,
    /// Raw telemetry line, when the intermediary sends it apart from `message`
    pub state: Option<String>,
}

/// Wire shape of an envelope body
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
}

impl StatusEnvelope {
    pub fn new(category: Category, status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            status: status.into(),
            message: message.into(),
            state: None,
        }
    }

    pub fn success(category: Category, message: impl Into<String>) -> Self {
        Self::new(category, STATUS_SUCCESS, message)
    }

    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self::new(category, STATUS_ERROR, message)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Telemetry line carried by a `state_update`, if any
    pub fn telemetry_line(&self) -> &str {
        self.state.as_deref().unwrap_or(&self.message)
    }
}

/// Decode raw bytes received on `category`
pub fn decode(category: Category, raw: &[u8]) -> Result<StatusEnvelope, EnvelopeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| EnvelopeError::new(category, e.to_string()))?;
    decode_value(category, value)
}

/// Decode an already-parsed JSON payload received on `category`.
///
/// A JSON string is parsed once more, since some intermediaries emit the
/// envelope double-encoded.
pub fn decode_value(category: Category, value: Value) -> Result<StatusEnvelope, EnvelopeError> {
    let value = match value {
        Value::String(text) => serde_json::from_str::<Value>(&text)
            .map_err(|e| EnvelopeError::new(category, format!("string payload is not JSON: {e}")))?,
        other => other,
    };

    if !value.is_object() {
        return Err(EnvelopeError::new(category, "payload is not an object"));
    }

    let wire: WireEnvelope =
        serde_json::from_value(value).map_err(|e| EnvelopeError::new(category, e.to_string()))?;

    let status = wire
        .status
        .ok_or_else(|| EnvelopeError::new(category, "missing `status`"))?;

    let message = match (wire.message, &wire.state) {
        (Some(message), _) => message,
        (None, Some(state)) => state.clone(),
        (None, None) => return Err(EnvelopeError::new(category, "missing `message`")),
    };

    Ok(StatusEnvelope {
        category,
        status,
        message,
        state: wire.state,
    })
}

/// Wire body of an envelope; the category stays with the channel
pub fn encode(envelope: &StatusEnvelope) -> Vec<u8> {
    // Serializing a struct of strings cannot fail
    serde_json::to_vec(&to_value(envelope)).unwrap_or_default()
}

/// JSON value of an envelope, as carried in `event` and `response` frames
pub fn to_value(envelope: &StatusEnvelope) -> Value {
    let wire = WireEnvelope {
        status: Some(envelope.status.clone()),
        message: Some(envelope.message.clone()),
        state: envelope.state.clone(),
    };
    serde_json::to_value(wire).unwrap_or(Value::Null)
}

/// Outbound correlated request for `command`
pub fn encode_request(id: u64, command: &DroneCommand) -> Frame {
    Frame::Request {
        id,
        command: command.name().to_string(),
        data: command.request_data(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MoveDirection;
    use serde_json::json;

    #[test]
    fn test_decode_object() {
        let env = decode(
            Category::Move,
            br#"{"status":"success","message":"Successfully moved up"}"#,
        )
        .unwrap();
        assert_eq!(env.category, Category::Move);
        assert!(env.is_success());
        assert_eq!(env.message, "Successfully moved up");
    }

    #[test]
    fn test_decode_double_encoded() {
        let raw = json!(r#"{"status":"error","message":"Invalid move"}"#);
        let env = decode_value(Category::Move, raw).unwrap();
        assert_eq!(env.status, "error");
        assert!(!env.is_success());
    }

    #[test]
    fn test_unknown_status_passes_through() {
        let env = decode(Category::Flip, br#"{"status":"pending","message":"later"}"#).unwrap();
        assert_eq!(env.status, "pending");
        assert!(!env.is_success());
    }

    #[test]
    fn test_state_field_stands_in_for_message() {
        let env = decode(Category::State, br#"{"status":"success","state":"pitch:0;"}"#).unwrap();
        assert_eq!(env.message, "pitch:0;");
        assert_eq!(env.telemetry_line(), "pitch:0;");
    }

    #[test]
    fn test_missing_fields_fail() {
        assert!(decode(Category::Move, br#"{"message":"no status"}"#).is_err());
        assert!(decode(Category::Move, br#"{"status":"success"}"#).is_err());
        assert!(decode(Category::Move, b"[1,2,3]").is_err());
        assert!(decode(Category::Move, b"not json").is_err());
        assert!(decode(Category::Move, br#"{"status":1,"message":"x"}"#).is_err());
    }

    #[test]
    fn test_round_trip_preserves_status_and_message() {
        let raw = br#"{"status":"error","message":"Unexpected error during movement: timeout"}"#;
        let env = decode(Category::Rotate, raw).unwrap();
        let again = decode(Category::Rotate, &encode(&env)).unwrap();
        assert_eq!(again.status, env.status);
        assert_eq!(again.message, env.message);
    }

    #[test]
    fn test_encode_request() {
        let frame = encode_request(
            7,
            &DroneCommand::Move {
                direction: MoveDirection::Left,
                distance_cm: Some(30),
            },
        );
        assert_eq!(
            frame,
            Frame::Request {
                id: 7,
                command: "move".into(),
                data: json!({"direction": "left", "distance": 30}),
            }
        );
    }
}
