//! Request/response command facade

use super::{ensure_connected, log_outcome};
use crate::connection::Session;
use crate::error::ClientError;
use tello_shared::{
    ConnectionState, DirectionError, DroneCommand, DroneState, FlipDirection, MoveDirection,
    RotateDirection, StatusEnvelope,
};
use tracing::{info, warn};

/// Awaited commands; each call returns the intermediary's outcome
pub struct RequestClient {
    session: Session,
}

impl RequestClient {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Open the session, then ask the intermediary to connect to the drone.
    /// Returns the intermediary's message.
    pub async fn connect(&self) -> Result<String, ClientError> {
        info!("connect: {}", self.session.config().endpoint());
        let result = match self.session.connect().await {
            Ok(()) => self.execute(DroneCommand::Connect).await.map(|e| e.message),
            Err(e) => Err(e),
        };
        log_outcome("connect", &result);
        result
    }

    /// Ask the intermediary to release the drone, then close the session.
    /// The session is closed even if the remote disconnect fails.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        info!("disconnect");
        if self.session.state() == ConnectionState::Connected {
            if let Err(e) = self.execute(DroneCommand::Disconnect).await {
                warn!("Remote disconnect failed: {}", e);
            }
        }
        let result = self.session.disconnect().await;
        log_outcome("disconnect", &result);
        result
    }

    pub async fn takeoff(&self) -> Result<String, ClientError> {
        self.command("takeoff", "", Ok(DroneCommand::Takeoff)).await
    }

    pub async fn land(&self) -> Result<String, ClientError> {
        self.command("land", "", Ok(DroneCommand::Land)).await
    }

    /// Move with the intermediary's default distance
    pub async fn move_to(&self, direction: &str) -> Result<String, ClientError> {
        self.move_with(direction, None).await
    }

    pub async fn move_by(&self, direction: &str, distance_cm: u32) -> Result<String, ClientError> {
        self.move_with(direction, Some(distance_cm)).await
    }

    async fn move_with(
        &self,
        direction: &str,
        distance_cm: Option<u32>,
    ) -> Result<String, ClientError> {
        let command = direction
            .parse::<MoveDirection>()
            .map(|direction| DroneCommand::Move {
                direction,
                distance_cm,
            });
        self.command("move", direction, command).await
    }

    /// Rotate with the intermediary's default angle
    pub async fn rotate(&self, direction: &str) -> Result<String, ClientError> {
        self.rotate_with(direction, None).await
    }

    pub async fn rotate_by(&self, direction: &str, angle_deg: u32) -> Result<String, ClientError> {
        self.rotate_with(direction, Some(angle_deg)).await
    }

    async fn rotate_with(
        &self,
        direction: &str,
        angle_deg: Option<u32>,
    ) -> Result<String, ClientError> {
        let command = direction
            .parse::<RotateDirection>()
            .map(|direction| DroneCommand::Rotate {
                direction,
                angle_deg,
            });
        self.command("rotate", direction, command).await
    }

    pub async fn flip(&self, direction: &str) -> Result<String, ClientError> {
        let command = direction
            .parse::<FlipDirection>()
            .map(|direction| DroneCommand::Flip { direction });
        self.command("flip", direction, command).await
    }

    /// Fetch and decode one telemetry snapshot
    pub async fn request_state(&self) -> Result<DroneState, ClientError> {
        info!("state");
        let result = match self.execute(DroneCommand::RequestState).await {
            Ok(envelope) => DroneState::decode(envelope.telemetry_line()).map_err(ClientError::from),
            Err(e) => Err(e),
        };
        log_outcome("state", &result);
        result
    }

    /// Log, validate and execute one operation; `argument` is the caller's raw input
    async fn command(
        &self,
        operation: &str,
        argument: &str,
        command: Result<DroneCommand, DirectionError>,
    ) -> Result<String, ClientError> {
        info!("{}: {}", operation, argument);
        let result = match command {
            Ok(command) => self.execute(command).await.map(|e| e.message),
            Err(e) => Err(e.into()),
        };
        log_outcome(operation, &result);
        result
    }

    /// Send one request and turn a non-success status into `CommandRejected`
    pub async fn execute(&self, command: DroneCommand) -> Result<StatusEnvelope, ClientError> {
        ensure_connected(&self.session)?;
        let name = command.name();
        let envelope = self.session.request(command).await?;
        if envelope.is_success() {
            Ok(envelope)
        } else {
            Err(ClientError::CommandRejected {
                command: name,
                message: envelope.message,
            })
        }
    }
}
