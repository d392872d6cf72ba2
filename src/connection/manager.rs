//! Session connection with automatic reconnection
//!
//! One spawned task owns the transport handle, the state machine and the
//! table of in-flight requests. Callers talk to it over a command channel
//! and observe its state through a `watch`, so inbound frames, reconnect
//! timers and caller commands are all serialized onto that single task.

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::router::EventRouter;
use crate::transport::{TransportConnector, TransportStream};
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tello_shared::codec::{self, FrameDecoder};
use tello_shared::envelope::{self, StatusEnvelope};
use tello_shared::{
    Category, ConnectionEvent, ConnectionState, ConnectionStateMachine, DroneCommand, Frame,
    TransitionResult,
};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How often overdue requests are swept
const REQUEST_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

const READ_BUFFER_SIZE: usize = 4096;

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

/// Commands accepted by the session task
enum SessionCommand {
    Connect { reply: Reply<()> },
    Disconnect { reply: Reply<()> },
    Send { frame: Frame, reply: Reply<()> },
    Request { command: DroneCommand, reply: Reply<StatusEnvelope> },
}

/// Handle to one logical link with the intermediary
pub struct Session {
    config: SessionConfig,
    commands: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    router: Arc<EventRouter>,
}

impl Session {
    /// Create a session and start its task. Nothing connects until
    /// [`Session::connect`] is called.
    pub fn new<C: TransportConnector>(connector: C, config: SessionConfig) -> Self {
        let (commands, command_rx) = mpsc::channel::<SessionCommand>(100);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let router = Arc::new(EventRouter::new());

        let task = SessionTask {
            connector: Arc::new(connector),
            fsm: ConnectionStateMachine::new(config.reconnect_attempts),
            config: config.clone(),
            state_tx,
            router: router.clone(),
            commands: command_rx,
            link: None,
            connect_waiters: Vec::new(),
            pending: HashMap::new(),
            next_request_id: 1,
            last_error: String::new(),
        };
        tokio::spawn(task.run());

        Self {
            config,
            commands,
            state_rx,
            router,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Connect and wait for the outcome.
    ///
    /// Resolves once the handshake succeeds, even if earlier attempts failed.
    /// Fails with `ConnectionFailed` once the retry budget is spent and with
    /// `Cancelled` if a disconnect intervenes. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.call(|reply| SessionCommand::Connect { reply }).await
    }

    /// Release the transport, cancel any reconnect timer and pending requests
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.call(|reply| SessionCommand::Disconnect { reply }).await
    }

    /// Write one frame without waiting for any answer
    pub async fn send(&self, frame: Frame) -> Result<(), ClientError> {
        self.call(|reply| SessionCommand::Send { frame, reply }).await
    }

    /// Send a correlated request and wait for its response envelope
    pub async fn request(&self, command: DroneCommand) -> Result<StatusEnvelope, ClientError> {
        self.call(|reply| SessionCommand::Request { command, reply })
            .await
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }
}

/// An open transport with its partially decoded input
struct Link<S> {
    stream: S,
    decoder: FrameDecoder,
}

struct PendingRequest {
    command: &'static str,
    category: Category,
    deadline: Instant,
    reply: Reply<StatusEnvelope>,
}

/// What woke the connected loop
enum Wake {
    Read(std::io::Result<usize>),
    Command(Option<SessionCommand>),
    Sweep,
}

struct SessionTask<C: TransportConnector> {
    connector: Arc<C>,
    config: SessionConfig,
    fsm: ConnectionStateMachine,
    state_tx: watch::Sender<ConnectionState>,
    router: Arc<EventRouter>,
    commands: mpsc::Receiver<SessionCommand>,
    /// The single transport handle; `Some` only while `Connected`
    link: Option<Link<C::Stream>>,
    connect_waiters: Vec<Reply<()>>,
    pending: HashMap<u64, PendingRequest>,
    next_request_id: u64,
    last_error: String,
}

impl<C: TransportConnector> SessionTask<C> {
    async fn run(mut self) {
        debug!("Session task started for {}", self.config.endpoint());

        loop {
            let running = match self.fsm.state() {
                ConnectionState::Disconnected | ConnectionState::Failed => self.idle().await,
                ConnectionState::Connecting => self.attempt().await,
                ConnectionState::Connected => self.serve().await,
                ConnectionState::Reconnecting => self.backoff().await,
            };
            if !running {
                break;
            }
        }

        self.shutdown().await;
    }

    /// No transport: only commands can move us
    async fn idle(&mut self) -> bool {
        match self.commands.recv().await {
            Some(command) => {
                self.handle_command(command).await;
                true
            }
            None => false,
        }
    }

    /// One connect attempt, still answering commands while it runs
    async fn attempt(&mut self) -> bool {
        info!(
            "Connecting to {} via {} (attempt {}/{})",
            self.config.endpoint(),
            self.connector.name(),
            self.fsm.failed_attempts() + 1,
            self.fsm.max_attempts()
        );

        let connecting = open_link(
            self.connector.clone(),
            self.config.namespace.clone(),
            self.config.connect_timeout(),
        );
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    self.finish_attempt(result);
                    return true;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return false;
                    };
                    self.handle_command(command).await;
                    // Disconnect abandons the attempt; dropping the future closes it
                    if self.fsm.state() != ConnectionState::Connecting {
                        return true;
                    }
                }
            }
        }
    }

    fn finish_attempt(&mut self, result: Result<Link<C::Stream>>) {
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.transition(ConnectionEvent::HandshakeSucceeded);
                info!("Connected to {}", self.config.endpoint());
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                warn!("Connect attempt failed: {:#}", e);
                self.last_error = format!("{:#}", e);
                if self.transition(ConnectionEvent::AttemptFailed) == ConnectionState::Failed {
                    let attempts = self.fsm.failed_attempts();
                    error!(
                        "Giving up on {} after {} attempts: {}",
                        self.config.endpoint(),
                        attempts,
                        self.last_error
                    );
                    for waiter in self.connect_waiters.drain(..) {
                        let _ = waiter.send(Err(ClientError::ConnectionFailed {
                            attempts,
                            reason: self.last_error.clone(),
                        }));
                    }
                }
            }
        }
    }

    /// Wait out the reconnect delay; a disconnect cancels the timer
    async fn backoff(&mut self) -> bool {
        let delay = tokio::time::sleep(self.config.reconnect_delay());
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => {
                    self.transition(ConnectionEvent::RetryDelayElapsed);
                    return true;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return false;
                    };
                    self.handle_command(command).await;
                    if self.fsm.state() != ConnectionState::Reconnecting {
                        return true;
                    }
                }
            }
        }
    }

    /// Pump inbound frames and caller commands while connected
    async fn serve(&mut self) -> bool {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut sweep = interval(REQUEST_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Frames that arrived together with the handshake
        if let Err(reason) = self.drain_frames() {
            self.connection_lost(reason);
            return true;
        }

        while self.fsm.state() == ConnectionState::Connected {
            let Some(link) = self.link.as_mut() else {
                break;
            };

            let wake = tokio::select! {
                read = link.stream.read(&mut buf) => Wake::Read(read),
                command = self.commands.recv() => Wake::Command(command),
                _ = sweep.tick() => Wake::Sweep,
            };

            match wake {
                Wake::Read(Ok(0)) => {
                    self.connection_lost("intermediary closed the connection".into());
                }
                Wake::Read(Ok(n)) => {
                    if let Some(link) = self.link.as_mut() {
                        link.decoder.extend(&buf[..n]);
                    }
                    if let Err(reason) = self.drain_frames() {
                        self.connection_lost(reason);
                    }
                }
                Wake::Read(Err(e)) => {
                    self.connection_lost(format!("read error: {}", e));
                }
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Command(None) => return false,
                Wake::Sweep => self.sweep_overdue(),
            }
        }
        true
    }

    /// Decode and dispatch every complete frame, in arrival order
    fn drain_frames(&mut self) -> Result<(), String> {
        loop {
            let next = match self.link.as_mut() {
                Some(link) => link.decoder.decode_next(),
                None => return Ok(()),
            };
            match next {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => return Ok(()),
                Err(e) if e.is_recoverable() => warn!("Dropping undecodable frame: {}", e),
                Err(e) => return Err(format!("framing error: {}", e)),
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        match frame {
            Frame::Event { event, data } => match Category::from_event_name(&event) {
                Some(category) => {
                    debug!("<- {} {}", event, data);
                    // Decode failures are logged by the router and go no further
                    let _ = self.router.deliver_value(category, data);
                }
                None => debug!("Ignoring unknown event `{}`", event),
            },
            Frame::Response { id, data } => match self.pending.remove(&id) {
                Some(pending) => {
                    debug!("<- response #{} for `{}`", id, pending.command);
                    let result = envelope::decode_value(pending.category, data)
                        .map_err(ClientError::from);
                    let _ = pending.reply.send(result);
                }
                None => warn!("Response #{} matches no pending request", id),
            },
            other => debug!("Ignoring unexpected `{}` frame", other.kind()),
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { reply } => self.handle_connect(reply),
            SessionCommand::Disconnect { reply } => {
                self.teardown().await;
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Send { frame, reply } => {
                let result = self.write(&frame).await;
                let _ = reply.send(result);
            }
            SessionCommand::Request { command, reply } => self.start_request(command, reply).await,
        }
    }

    fn handle_connect(&mut self, reply: Reply<()>) {
        match self.fsm.state() {
            ConnectionState::Connected => {
                debug!("Connect requested while already connected");
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.connect_waiters.push(reply);
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.connect_waiters.push(reply);
                self.transition(ConnectionEvent::ConnectRequested);
            }
        }
    }

    async fn start_request(&mut self, command: DroneCommand, reply: Reply<StatusEnvelope>) {
        let id = self.next_request_id;
        self.next_request_id += 1;

        let frame = envelope::encode_request(id, &command);
        if let Err(e) = self.write(&frame).await {
            let _ = reply.send(Err(e));
            return;
        }

        debug!("-> request #{} `{}`", id, command.name());
        self.pending.insert(
            id,
            PendingRequest {
                command: command.name(),
                category: command.category(),
                deadline: Instant::now() + self.config.request_timeout(),
                reply,
            },
        );
    }

    /// Write a frame on the open link; a failed write counts as connection loss
    async fn write(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let state = self.fsm.state();
        let Some(link) = self.link.as_mut().filter(|_| state == ConnectionState::Connected) else {
            return Err(ClientError::NotConnected { state });
        };

        match write_frame(&mut link.stream, frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = format!("write error: {:#}", e);
                self.connection_lost(reason.clone());
                Err(ClientError::Transport(reason))
            }
        }
    }

    fn sweep_overdue(&mut self) {
        let now = Instant::now();
        let overdue: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in overdue {
            if let Some(pending) = self.pending.remove(&id) {
                warn!("Request #{} `{}` timed out", id, pending.command);
                let _ = pending.reply.send(Err(ClientError::Timeout {
                    command: pending.command,
                    timeout_ms: self.config.request_timeout_ms,
                }));
            }
        }
    }

    /// Unexpected loss: drop the handle and let the state machine decide
    fn connection_lost(&mut self, reason: String) {
        warn!("Connection to {} lost: {}", self.config.endpoint(), reason);
        self.link = None;
        self.fail_pending(|| ClientError::ConnectionLost(reason.clone()));
        self.last_error = reason;
        self.transition(ConnectionEvent::ConnectionLost);
    }

    /// Explicit disconnect, honored from any state
    async fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = TransportStream::shutdown(&mut link.stream).await {
                debug!("Transport shutdown failed: {:#}", e);
            }
        }
        self.fail_pending(|| ClientError::Cancelled);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::Cancelled));
        }
        self.transition(ConnectionEvent::DisconnectRequested);
    }

    fn fail_pending(&mut self, error: impl Fn() -> ClientError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(error()));
        }
    }

    /// The session handle is gone: release everything it owned
    async fn shutdown(&mut self) {
        self.teardown().await;
        self.router.clear();
        debug!("Session task for {} stopped", self.config.endpoint());
    }

    /// Apply an event, publish the new state, and report it on `connection_status`
    fn transition(&mut self, event: ConnectionEvent) -> ConnectionState {
        let from = self.fsm.state();
        match self.fsm.process_event(event) {
            TransitionResult::Success(to) => {
                if from != to {
                    debug!("Session {} -> {}", from, to);
                    self.state_tx.send_replace(to);
                    let status = self.status_envelope(to);
                    self.router.deliver_envelope(&status);
                }
                to
            }
            TransitionResult::Invalid { from, event } => {
                warn!("Ignoring {:?} while {}", event, from);
                from
            }
        }
    }

    fn status_envelope(&self, state: ConnectionState) -> StatusEnvelope {
        let endpoint = self.config.endpoint();
        let max = self.fsm.max_attempts();
        match state {
            ConnectionState::Connecting => StatusEnvelope::success(
                Category::Connection,
                format!(
                    "Connecting to {} (attempt {}/{})",
                    endpoint,
                    self.fsm.failed_attempts() + 1,
                    max
                ),
            ),
            ConnectionState::Connected => {
                StatusEnvelope::success(Category::Connection, format!("Connected to {}", endpoint))
            }
            ConnectionState::Reconnecting => StatusEnvelope::error(
                Category::Connection,
                format!(
                    "{}; retrying in {}ms ({}/{} attempts used)",
                    self.last_error,
                    self.config.reconnect_delay_ms,
                    self.fsm.failed_attempts(),
                    max
                ),
            ),
            ConnectionState::Failed => StatusEnvelope::error(
                Category::Connection,
                format!(
                    "Failed to connect to {} after {} attempts: {}",
                    endpoint,
                    self.fsm.failed_attempts(),
                    self.last_error
                ),
            ),
            ConnectionState::Disconnected => StatusEnvelope::success(
                Category::Connection,
                format!("Disconnected from {}", endpoint),
            ),
        }
    }
}

/// Connect and complete the namespace handshake within `limit`
async fn open_link<C: TransportConnector>(
    connector: Arc<C>,
    namespace: String,
    limit: Duration,
) -> Result<Link<C::Stream>> {
    timeout(limit, join_namespace(&*connector, &namespace))
        .await
        .map_err(|_| anyhow!("connect timed out after {}ms", limit.as_millis()))?
}

async fn join_namespace<C: TransportConnector>(
    connector: &C,
    namespace: &str,
) -> Result<Link<C::Stream>> {
    let mut stream = connector.connect().await?;
    write_frame(
        &mut stream,
        &Frame::Join {
            namespace: namespace.to_string(),
        },
    )
    .await?;

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        while let Some(frame) = decoder.decode_next()? {
            match frame {
                Frame::Joined { namespace: joined } if joined == namespace => {
                    return Ok(Link { stream, decoder });
                }
                Frame::Joined { namespace: joined } => {
                    bail!("joined `{}` instead of `{}`", joined, namespace)
                }
                other => debug!("Ignoring `{}` frame before handshake", other.kind()),
            }
        }

        let n = stream.read(&mut buf).await?;
        if n == 0 {
            bail!("intermediary closed the connection during handshake");
        }
        decoder.extend(&buf[..n]);
    }
}

pub(crate) async fn write_frame<S>(stream: &mut S, frame: &Frame) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let encoded = codec::encode(frame)?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    Ok(())
}
