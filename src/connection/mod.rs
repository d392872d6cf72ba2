//! Session management for the link to the intermediary
//!
//! This module handles:
//! - Connecting and joining the namespace
//! - Automatic reconnection with a bounded retry budget
//! - Routing pushed events and correlating request responses
//! - Publishing connection-status transitions

mod manager;

#[cfg(test)]
pub(crate) use manager::write_frame;
pub use manager::Session;
