//! Wire frames exchanged with the intermediary

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DroneCommand;

/// One length-prefixed JSON message in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client asks to join a namespace (handshake, client -> intermediary)
    Join { namespace: String },
    /// Intermediary accepted the join (handshake, intermediary -> client)
    Joined { namespace: String },
    /// Push traffic: a named event with an arbitrary payload
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Correlated request (client -> intermediary)
    Request {
        id: u64,
        command: String,
        #[serde(default)]
        data: Value,
    },
    /// Response to the request with the same id
    Response { id: u64, data: Value },
}

impl Frame {
    /// Fire-and-forget push frame for a command
    pub fn event(command: &DroneCommand) -> Self {
        Frame::Event {
            event: command.name().to_string(),
            data: command.event_data(),
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Join { .. } => "join",
            Frame::Joined { .. } => "joined",
            Frame::Event { .. } => "event",
            Frame::Request { .. } => "request",
            Frame::Response { .. } => "response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MoveDirection;
    use serde_json::json;

    #[test]
    fn test_event_frame_shape() {
        let frame = Frame::event(&DroneCommand::Move {
            direction: MoveDirection::Forward,
            distance_cm: None,
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"type": "event", "event": "move", "data": "forward"}));
    }

    #[test]
    fn test_event_without_data() {
        let frame: Frame = serde_json::from_str(r#"{"type":"event","event":"state"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Event {
                event: "state".into(),
                data: Value::Null
            }
        );
        assert_eq!(frame.kind(), "event");
    }
}
