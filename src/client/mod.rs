//! Command facades over a [`Session`](crate::connection::Session)
//!
//! Two flavors share one session implementation:
//! - [`EventClient`] writes fire-and-forget `event` frames; outcomes arrive
//!   later as status envelopes through the router.
//! - [`RequestClient`] sends correlated requests and returns the outcome,
//!   failing with `CommandRejected` on a non-success status.
//!
//! Both validate directions before touching the session and refuse to send
//! unless the session is `Connected`.

mod events;
mod request;

pub use events::EventClient;
pub use request::RequestClient;

use crate::connection::Session;
use crate::error::ClientError;
use tello_shared::ConnectionState;
use tracing::{info, warn};

fn ensure_connected(session: &Session) -> Result<(), ClientError> {
    match session.state() {
        ConnectionState::Connected => Ok(()),
        state => Err(ClientError::NotConnected { state }),
    }
}

fn log_outcome<T>(operation: &str, result: &Result<T, ClientError>) {
    match result {
        Ok(_) => info!("{}: done", operation),
        Err(e) => warn!("{}: failed: {}", operation, e),
    }
}
