//! Connection State Machine
//!
//! Defines the valid session transitions and the reconnect budget. The
//! session task is the only writer; everything else observes.

use std::fmt;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Initial state, and the result of an explicit disconnect
    #[default]
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Handshake complete, traffic flows
    Connected,
    /// Waiting out the delay before the next attempt
    Reconnecting,
    /// Retry budget exhausted; only an explicit connect leaves this state
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Explicit connect request from the caller
    ConnectRequested,
    /// Transport connected and the namespace was joined
    HandshakeSucceeded,
    /// A connect attempt failed or timed out
    AttemptFailed,
    /// An established connection dropped unexpectedly
    ConnectionLost,
    /// Reconnect delay elapsed
    RetryDelayElapsed,
    /// Explicit disconnect request from the caller
    DisconnectRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: ConnectionEvent,
    },
}

/// The session state machine with its retry accounting
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
    /// Consecutive failed attempts since the last successful handshake
    failed_attempts: u32,
    max_attempts: u32,
}

impl ConnectionStateMachine {
    /// `max_attempts` consecutive failures move the session to `Failed`
    pub fn new(max_attempts: u32) -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
            failed_attempts: 0,
            max_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another automatic attempt is allowed
    pub fn has_budget(&self) -> bool {
        self.failed_attempts < self.max_attempts
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ConnectionEvent) -> TransitionResult {
        // Disconnect is honored from every state
        if event == ConnectionEvent::DisconnectRequested {
            self.failed_attempts = 0;
            self.current_state = ConnectionState::Disconnected;
            return TransitionResult::Success(self.current_state);
        }

        match self.get_next_state(&event) {
            Some(state) => {
                match event {
                    ConnectionEvent::ConnectRequested | ConnectionEvent::HandshakeSucceeded => {
                        self.failed_attempts = 0;
                    }
                    ConnectionEvent::AttemptFailed => {
                        self.failed_attempts = self.failed_attempts.saturating_add(1);
                    }
                    _ => {}
                }
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: &ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self.current_state, event) {
            // A new connect may only start when no handle is open or opening
            (Disconnected | Failed, ConnectRequested) => Some(Connecting),

            (Connecting, HandshakeSucceeded) => Some(Connected),

            // The failing attempt is counted before checking the budget
            (Connecting, AttemptFailed) if self.failed_attempts + 1 < self.max_attempts => {
                Some(Reconnecting)
            }
            (Connecting, AttemptFailed) => Some(Failed),

            (Connected, ConnectionLost) if self.max_attempts > 0 => Some(Reconnecting),
            (Connected, ConnectionLost) => Some(Failed),

            (Reconnecting, RetryDelayElapsed) if self.has_budget() => Some(Connecting),
            (Reconnecting, RetryDelayElapsed) => Some(Failed),

            _ => None,
        }
    }
}
