//! Tello Console
//!
//! Client side of the drone console: a reconnecting session to the
//! intermediary, an event router for status envelopes and telemetry, and
//! command facades for the push and request/response transport variants.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod router;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{EventClient, RequestClient};
pub use config::{SessionConfig, TransportMode};
pub use connection::Session;
pub use error::ClientError;
pub use router::{EventRouter, Subscription};
