//! Errors surfaced to callers of the session and its command facades

use tello_shared::{ConnectionState, DirectionError, EnvelopeError, TelemetryError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Direction outside its closed set; rejected before any I/O
    #[error(transparent)]
    InvalidArgument(#[from] DirectionError),

    #[error("Not connected (session is {state})")]
    NotConnected { state: ConnectionState },

    /// The intermediary answered with a non-success status; `message` is verbatim
    #[error("{message}")]
    CommandRejected {
        command: &'static str,
        message: String,
    },

    #[error("Operation cancelled by disconnect")]
    Cancelled,

    /// Retry budget exhausted; the session is `Failed` until the next connect
    #[error("Connection failed after {attempts} attempts: {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Request `{command}` timed out after {timeout_ms}ms")]
    Timeout {
        command: &'static str,
        timeout_ms: u64,
    },

    #[error(transparent)]
    MalformedTelemetry(#[from] TelemetryError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session task has shut down")]
    SessionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_keeps_remote_message() {
        let err = ClientError::CommandRejected {
            command: "move",
            message: "Invalid move. Must be one of: up, down".into(),
        };
        assert_eq!(err.to_string(), "Invalid move. Must be one of: up, down");
    }

    #[test]
    fn test_invalid_argument_from_direction() {
        let err: ClientError = "sideways"
            .parse::<tello_shared::RotateDirection>()
            .unwrap_err()
            .into();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
        assert!(err.to_string().contains("cw, ccw"));
    }
}
