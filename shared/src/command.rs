//! Outbound command vocabulary
//!
//! Each direction set is closed; anything outside it is rejected before a
//! command can be built.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};
use thiserror::Error;

use crate::Category;

/// Error for a direction outside its closed set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind} direction `{value}`. Must be one of: {}", .allowed.join(", "))]
pub struct DirectionError {
    pub kind: &'static str,
    pub value: String,
    pub allowed: &'static [&'static str],
}

macro_rules! direction_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALLOWED: &'static [&'static str] = &[$($wire),+];

            /// Wire spelling of this direction
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DirectionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(DirectionError {
                        kind: $kind,
                        value: s.to_string(),
                        allowed: Self::ALLOWED,
                    }),
                }
            }
        }
    };
}

direction_enum!(
    /// Translation directions
    MoveDirection, "move", {
        Up => "up",
        Down => "down",
        Left => "left",
        Right => "right",
        Forward => "forward",
        Back => "back",
    }
);

direction_enum!(
    /// Yaw rotation directions
    RotateDirection, "rotate", {
        Clockwise => "cw",
        CounterClockwise => "ccw",
    }
);

direction_enum!(
    /// Flip directions. Note `backward`, where moves use `back`.
    FlipDirection, "flip", {
        Left => "left",
        Right => "right",
        Forward => "forward",
        Backward => "backward",
    }
);

/// A validated command bound for the intermediary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DroneCommand {
    Connect,
    Disconnect,
    Takeoff,
    Land,
    Move {
        direction: MoveDirection,
        distance_cm: Option<u32>,
    },
    Rotate {
        direction: RotateDirection,
        angle_deg: Option<u32>,
    },
    Flip {
        direction: FlipDirection,
    },
    RequestState,
}

impl DroneCommand {
    /// Command name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            DroneCommand::Connect => "connect",
            DroneCommand::Disconnect => "disconnect",
            DroneCommand::Takeoff => "takeoff",
            DroneCommand::Land => "land",
            DroneCommand::Move { .. } => "move",
            DroneCommand::Rotate { .. } => "rotate",
            DroneCommand::Flip { .. } => "flip",
            DroneCommand::RequestState => "state",
        }
    }

    /// Category the command's outcome is reported under
    pub fn category(&self) -> Category {
        match self {
            DroneCommand::Connect | DroneCommand::Disconnect => Category::Connection,
            DroneCommand::Takeoff | DroneCommand::Land | DroneCommand::Move { .. } => {
                Category::Move
            }
            DroneCommand::Rotate { .. } => Category::Rotate,
            DroneCommand::Flip { .. } => Category::Flip,
            DroneCommand::RequestState => Category::State,
        }
    }

    /// Payload for a push `event` frame: the bare direction string
    pub fn event_data(&self) -> Value {
        match self {
            DroneCommand::Move { direction, .. } => Value::from(direction.as_str()),
            DroneCommand::Rotate { direction, .. } => Value::from(direction.as_str()),
            DroneCommand::Flip { direction } => Value::from(direction.as_str()),
            _ => Value::Null,
        }
    }

    /// Payload for a correlated `request` frame
    pub fn request_data(&self) -> Value {
        match self {
            DroneCommand::Move {
                direction,
                distance_cm,
            } => {
                let mut data = json!({ "direction": direction.as_str() });
                if let Some(distance) = distance_cm {
                    data["distance"] = json!(distance);
                }
                data
            }
            DroneCommand::Rotate {
                direction,
                angle_deg,
            } => {
                let mut data = json!({ "direction": direction.as_str() });
                if let Some(angle) = angle_deg {
                    data["angle"] = json!(angle);
                }
                data
            }
            DroneCommand::Flip { direction } => json!({ "direction": direction.as_str() }),
            _ => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_directions_closed_set() {
        assert_eq!("back".parse::<MoveDirection>(), Ok(MoveDirection::Back));
        let err = "backward".parse::<MoveDirection>().unwrap_err();
        assert_eq!(err.kind, "move");
        assert_eq!(err.allowed.len(), 6);
        assert!(err.to_string().contains("up, down, left, right, forward, back"));
    }

    #[test]
    fn test_flip_uses_backward() {
        assert_eq!("backward".parse::<FlipDirection>(), Ok(FlipDirection::Backward));
        assert!("back".parse::<FlipDirection>().is_err());
    }

    #[test]
    fn test_rotate_directions() {
        assert_eq!("ccw".parse::<RotateDirection>(), Ok(RotateDirection::CounterClockwise));
        assert!("CW".parse::<RotateDirection>().is_err());
    }

    #[test]
    fn test_request_data() {
        let cmd = DroneCommand::Move {
            direction: MoveDirection::Up,
            distance_cm: Some(50),
        };
        assert_eq!(cmd.request_data(), json!({"direction": "up", "distance": 50}));
        assert_eq!(cmd.event_data(), json!("up"));

        let cmd = DroneCommand::Rotate {
            direction: RotateDirection::Clockwise,
            angle_deg: None,
        };
        assert_eq!(cmd.request_data(), json!({"direction": "cw"}));
        assert_eq!(DroneCommand::RequestState.event_data(), Value::Null);
    }

    #[test]
    fn test_command_categories() {
        assert_eq!(DroneCommand::RequestState.category(), Category::State);
        assert_eq!(DroneCommand::Land.category(), Category::Move);
        assert_eq!(DroneCommand::Connect.name(), "connect");
    }
}
