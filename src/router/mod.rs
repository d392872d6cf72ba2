//! Event Router
//!
//! Maps each inbound category to its ordered list of subscribers. Delivery
//! decodes the payload once and hands the same envelope to every subscriber
//! of that category, in registration order. `state_update` envelopes are
//! additionally run through the telemetry decoder for telemetry subscribers.
//!
//! A frame that fails to decode is logged and reported to the caller of
//! `deliver`; it never reaches subscribers and never affects later frames.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tello_shared::envelope::{self, EnvelopeError};
use tello_shared::{Category, DroneState, StatusEnvelope, TelemetryError};
use tracing::{debug, warn};

pub type EnvelopeCallback = Arc<dyn Fn(&StatusEnvelope) + Send + Sync>;
pub type TelemetryCallback = Arc<dyn Fn(&DroneState) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Envelope(EnvelopeCallback),
    Telemetry(TelemetryCallback),
}

/// Handle returned by a registration, used to unregister it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    category: Category,
}

impl Subscription {
    pub fn category(&self) -> Category {
        self.category
    }
}

/// Publish-subscribe mapping from category to ordered listeners
pub struct EventRouter {
    next_id: AtomicU64,
    listeners: RwLock<BTreeMap<Category, Vec<(u64, Listener)>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register interest in every envelope of `category`
    pub fn subscribe<F>(&self, category: Category, callback: F) -> Subscription
    where
        F: Fn(&StatusEnvelope) + Send + Sync + 'static,
    {
        self.register(category, Listener::Envelope(Arc::new(callback)))
    }

    /// Register interest in decoded telemetry from `state_update`
    pub fn subscribe_telemetry<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DroneState) + Send + Sync + 'static,
    {
        self.register(Category::State, Listener::Telemetry(Arc::new(callback)))
    }

    fn register(&self, category: Category, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category)
            .or_default()
            .push((id, listener));
        debug!("Subscribed #{} to {}", id, category);
        Subscription { id, category }
    }

    /// Remove one registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = listeners.get_mut(&subscription.category) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != subscription.id);
        before != entries.len()
    }

    /// Remove every registration for `category`, returning how many were removed
    pub fn unsubscribe_all(&self, category: Category) -> usize {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&category)
            .map_or(0, |entries| entries.len())
    }

    /// Drop all registrations, e.g. when the owning session is torn down
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn subscriber_count(&self, category: Category) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .map_or(0, Vec::len)
    }

    /// Decode raw envelope bytes received on `category` and deliver them
    pub fn deliver(&self, category: Category, raw: &[u8]) -> Result<usize, EnvelopeError> {
        let envelope = envelope::decode(category, raw).inspect_err(|e| warn!("{}", e))?;
        Ok(self.deliver_envelope(&envelope))
    }

    /// Deliver the JSON payload of an `event` frame received on `category`
    pub fn deliver_value(&self, category: Category, value: Value) -> Result<usize, EnvelopeError> {
        let envelope = envelope::decode_value(category, value).inspect_err(|e| warn!("{}", e))?;
        Ok(self.deliver_envelope(&envelope))
    }

    /// Invoke the subscribers of the envelope's category. Returns how many
    /// callbacks ran.
    pub fn deliver_envelope(&self, envelope: &StatusEnvelope) -> usize {
        // Snapshot so callbacks may (un)subscribe without deadlocking
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.category)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        if listeners.is_empty() {
            debug!("No subscribers for {}", envelope.category);
            return 0;
        }

        let telemetry = self.decode_telemetry(envelope, &listeners);

        let mut invoked = 0;
        for listener in &listeners {
            match listener {
                Listener::Envelope(callback) => {
                    callback(envelope);
                    invoked += 1;
                }
                Listener::Telemetry(callback) => {
                    if let Some(state) = &telemetry {
                        callback(state);
                        invoked += 1;
                    }
                }
            }
        }
        invoked
    }

    /// Decode once per delivery, and only when someone asked for telemetry
    fn decode_telemetry(
        &self,
        envelope: &StatusEnvelope,
        listeners: &[Listener],
    ) -> Option<DroneState> {
        if envelope.category != Category::State || !envelope.is_success() {
            return None;
        }
        if !listeners.iter().any(|l| matches!(l, Listener::Telemetry(_))) {
            return None;
        }

        match DroneState::decode(envelope.telemetry_line()) {
            Ok(state) => Some(state),
            Err(TelemetryError::MalformedTelemetry { field, reason }) => {
                warn!("Skipping telemetry sample: malformed at `{}`: {}", field, reason);
                None
            }
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
