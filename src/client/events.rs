//! Push-variant command facade

use super::{ensure_connected, log_outcome};
use crate::connection::Session;
use crate::error::ClientError;
use crate::router::Subscription;
use tello_shared::{
    Category, DroneCommand, DroneState, FlipDirection, Frame, MoveDirection, RotateDirection,
    StatusEnvelope,
};
use tracing::info;

/// Fire-and-forget commands; results are observed through subscriptions
pub struct EventClient {
    session: Session,
}

impl EventClient {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        info!("connect: {}", self.session.config().endpoint());
        let result = self.session.connect().await;
        log_outcome("connect", &result);
        result
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        info!("disconnect");
        let result = self.session.disconnect().await;
        log_outcome("disconnect", &result);
        result
    }

    /// `direction` is one of up, down, left, right, forward, back
    pub async fn move_to(&self, direction: &str) -> Result<(), ClientError> {
        info!("move: {}", direction);
        let result = match direction.parse::<MoveDirection>() {
            Ok(direction) => {
                self.send(DroneCommand::Move {
                    direction,
                    distance_cm: None,
                })
                .await
            }
            Err(e) => Err(e.into()),
        };
        log_outcome("move", &result);
        result
    }

    /// `direction` is `cw` or `ccw`
    pub async fn rotate(&self, direction: &str) -> Result<(), ClientError> {
        info!("rotate: {}", direction);
        let result = match direction.parse::<RotateDirection>() {
            Ok(direction) => {
                self.send(DroneCommand::Rotate {
                    direction,
                    angle_deg: None,
                })
                .await
            }
            Err(e) => Err(e.into()),
        };
        log_outcome("rotate", &result);
        result
    }

    /// `direction` is one of left, right, forward, backward
    pub async fn flip(&self, direction: &str) -> Result<(), ClientError> {
        info!("flip: {}", direction);
        let result = match direction.parse::<FlipDirection>() {
            Ok(direction) => self.send(DroneCommand::Flip { direction }).await,
            Err(e) => Err(e.into()),
        };
        log_outcome("flip", &result);
        result
    }

    /// Ask for a `state_update`; the telemetry arrives through the router
    pub async fn request_state(&self) -> Result<(), ClientError> {
        info!("state");
        let result = self.send(DroneCommand::RequestState).await;
        log_outcome("state", &result);
        result
    }

    /// Write one already validated command as an `event` frame
    pub async fn send(&self, command: DroneCommand) -> Result<(), ClientError> {
        ensure_connected(&self.session)?;
        self.session.send(Frame::event(&command)).await
    }

    /// Subscribe to status envelopes of one category
    pub fn on_status<F>(&self, category: Category, callback: F) -> Subscription
    where
        F: Fn(&StatusEnvelope) + Send + Sync + 'static,
    {
        self.session.router().subscribe(category, callback)
    }

    /// Subscribe to decoded telemetry from `state_update`
    pub fn on_telemetry<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DroneState) + Send + Sync + 'static,
    {
        self.session.router().subscribe_telemetry(callback)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.session.router().unsubscribe(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_session, test_config, Collector, FakeIntermediary};
    use crate::transport::memory::MemoryConnector;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tello_shared::ConnectionState;

    const LINE: &str = "pitch:0;roll:0;yaw:0;vgx:0;vgy0;vgz:0;templ:60;temph:70;tof:10;h:0;bat:85;baro: 101.3; time:5;agx:0.0;agy:0.0;agz:-1000.0;";

    fn client() -> (EventClient, MemoryConnector, FakeIntermediary) {
        let (session, connector, server) = memory_session(test_config());
        (EventClient::new(session), connector, server)
    }

    #[tokio::test]
    async fn test_move_while_disconnected_is_rejected() {
        let (client, connector, _server) = client();
        let err = client.move_to("up").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::NotConnected { state: ConnectionState::Disconnected }
        ));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_direction_checked_first() {
        let (client, _connector, _server) = client();
        assert!(matches!(
            client.move_to("sideways").await,
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.rotate("clockwise").await,
            Err(ClientError::InvalidArgument(_))
        ));
        // `back` is a move direction, not a flip direction
        assert!(matches!(
            client.flip("back").await,
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_commands_are_sent_as_events() {
        let (client, _connector, mut server) = client();
        let (connected, peer) = tokio::join!(client.connect(), server.accept());
        connected.unwrap();
        let mut peer = peer.unwrap();

        client.move_to("forward").await.unwrap();
        client.rotate("ccw").await.unwrap();
        client.flip("backward").await.unwrap();
        client.request_state().await.unwrap();

        let expected = [
            ("move", json!("forward")),
            ("rotate", json!("ccw")),
            ("flip", json!("backward")),
            ("state", Value::Null),
        ];
        for (name, data) in expected {
            assert_eq!(
                peer.recv().await,
                Some(Frame::Event {
                    event: name.into(),
                    data,
                })
            );
        }
    }

    #[tokio::test]
    async fn test_status_and_telemetry_subscriptions() {
        let (client, _connector, mut server) = client();
        let statuses = Collector::new();
        client.on_status(Category::State, statuses.envelope_sink());
        let batteries = Arc::new(Mutex::new(Vec::new()));
        let batteries_clone = batteries.clone();
        client.on_telemetry(move |state| {
            batteries_clone.lock().unwrap().push(state.battery_percentage);
        });

        let (connected, peer) = tokio::join!(client.connect(), server.accept());
        connected.unwrap();
        let mut peer = peer.unwrap();

        peer.emit("state_update", json!({"status": "success", "message": LINE}))
            .await;
        peer.emit("state_update", json!({"status": "success", "message": "pitch:bad;"}))
            .await;

        assert_eq!(statuses.next().await.message, LINE);
        assert_eq!(statuses.next().await.message, "pitch:bad;");
        assert_eq!(*batteries.lock().unwrap(), vec![85]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (client, _connector, mut server) = client();
        let first = Collector::new();
        let second = Collector::new();
        let subscription = client.on_status(Category::Flip, first.envelope_sink());
        client.on_status(Category::Flip, second.envelope_sink());
        assert!(client.unsubscribe(subscription));

        let (connected, peer) = tokio::join!(client.connect(), server.accept());
        connected.unwrap();
        let mut peer = peer.unwrap();
        peer.emit("flip_status", json!({"status": "success", "message": "Successfully flipped left"}))
            .await;

        assert_eq!(second.next().await.message, "Successfully flipped left");
        assert!(first.is_empty());
    }
}
