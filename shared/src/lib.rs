//! Tello Shared Protocol Types
//!
//! This crate provides the I/O-free pieces of the drone console: the
//! telemetry decoder, the status envelope codec, the wire frame types and
//! their length-prefixed codec, and the connection state machine driven by
//! the session task.

pub mod codec;
pub mod command;
pub mod envelope;
pub mod protocol;
pub mod state_machine;
pub mod telemetry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use command::{DirectionError, DroneCommand, FlipDirection, MoveDirection, RotateDirection};
pub use envelope::{EnvelopeError, StatusEnvelope, STATUS_ERROR, STATUS_SUCCESS};
pub use protocol::Frame;
pub use state_machine::{ConnectionEvent, ConnectionState, ConnectionStateMachine, TransitionResult};
pub use telemetry::{DroneState, TelemetryError};

/// Protocol defaults shared by the client and its configuration
pub mod defaults {
    /// Default intermediary address
    pub const SERVER: &str = "127.0.0.1:5001";

    /// Default namespace joined on the intermediary
    pub const NAMESPACE: &str = "/tello";

    /// Consecutive failed connect attempts before the session is `Failed`
    pub const RECONNECT_ATTEMPTS: u32 = 5;

    /// Fixed delay between reconnect attempts
    pub const RECONNECT_DELAY_MS: u64 = 1000;

    /// Transport connect plus handshake timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Deadline for a correlated request to receive its response
    pub const REQUEST_TIMEOUT_MS: u64 = 5000;
}

/// Inbound event categories. The category of a status envelope is the
/// channel it arrived on, never its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Connection,
    Move,
    Rotate,
    Flip,
    State,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Connection,
        Category::Move,
        Category::Rotate,
        Category::Flip,
        Category::State,
    ];

    /// Event name the intermediary pushes this category on
    pub fn event_name(self) -> &'static str {
        match self {
            Category::Connection => "connection_status",
            Category::Move => "move_status",
            Category::Rotate => "rotate_status",
            Category::Flip => "flip_status",
            Category::State => "state_update",
        }
    }

    /// Map an inbound event name back to its category
    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.event_name() == name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_event_name(s).ok_or_else(|| format!("unknown event category: {s}"))
    }
}
