//! Fake intermediary and helpers for session tests

use crate::config::SessionConfig;
use crate::connection::{write_frame, Session};
use crate::transport::memory::{self, MemoryConnector, MemoryListener};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tello_shared::codec::FrameDecoder;
use tello_shared::{ConnectionState, Frame, StatusEnvelope};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Short delays so reconnect tests run quickly on the real clock
pub fn test_config() -> SessionConfig {
    SessionConfig {
        server: "mem:5001".into(),
        reconnect_attempts: 3,
        reconnect_delay_ms: 20,
        connect_timeout_ms: 1000,
        request_timeout_ms: 1000,
        ..SessionConfig::default()
    }
}

pub fn memory_session(config: SessionConfig) -> (Session, MemoryConnector, FakeIntermediary) {
    let (connector, listener) = memory::channel();
    let session = Session::new(connector.clone(), config);
    (session, connector, FakeIntermediary { listener })
}

pub async fn wait_for_state(session: &Session, state: ConnectionState) {
    let mut rx = session.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("session never reached {}", state))
        .expect("session task gone");
}

/// Accepts in-process connections and completes the join handshake
pub struct FakeIntermediary {
    listener: MemoryListener,
}

impl FakeIntermediary {
    pub async fn accept(&mut self) -> Option<Peer> {
        let stream = timeout(WAIT, self.listener.accept()).await.ok()??;
        let mut peer = Peer {
            stream,
            decoder: FrameDecoder::new(),
        };
        match peer.recv().await? {
            Frame::Join { namespace } => peer.send(&Frame::Joined { namespace }).await,
            other => panic!("expected join, got {:?}", other),
        }
        Some(peer)
    }

    /// Accept without answering the join; the test drives the handshake
    pub async fn accept_raw(&mut self) -> Option<Peer> {
        let stream = self.listener.accept().await?;
        Some(Peer {
            stream,
            decoder: FrameDecoder::new(),
        })
    }
}

/// Intermediary end of one accepted connection
pub struct Peer {
    stream: DuplexStream,
    decoder: FrameDecoder,
}

impl Peer {
    /// Next frame from the client; `None` once it hangs up
    pub async fn recv(&mut self) -> Option<Frame> {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = self.decoder.decode_next().expect("client sent a bad frame") {
                return Some(frame);
            }
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for the client")
                .ok()?;
            if n == 0 {
                return None;
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    pub async fn send(&mut self, frame: &Frame) {
        write_frame(&mut self.stream, frame)
            .await
            .expect("write to client failed");
    }

    pub async fn emit(&mut self, event: &str, data: Value) {
        self.send(&Frame::Event {
            event: event.into(),
            data,
        })
        .await;
    }

    pub async fn respond(&mut self, id: u64, data: Value) {
        self.send(&Frame::Response { id, data }).await;
    }

    /// Bytes written as-is, with no framing
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// A correctly framed body that is not a valid frame
    pub async fn send_raw_body(&mut self, body: &[u8]) {
        self.send_raw(&(body.len() as u32).to_be_bytes()).await;
        self.send_raw(body).await;
    }

    /// Answer every request with `reply(command, data)` until the client hangs up
    pub fn serve<F>(mut self, reply: F) -> tokio::task::JoinHandle<Vec<Frame>>
    where
        F: Fn(&str, &Value) -> Value + Send + 'static,
    {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(frame) = self.recv().await {
                if let Frame::Request { id, command, data } = &frame {
                    let answer = reply(command, data);
                    self.respond(*id, answer).await;
                }
                seen.push(frame);
            }
            seen
        })
    }
}

/// Subscriber that records envelopes for later assertions
#[derive(Clone, Default)]
pub struct Collector {
    items: Arc<Mutex<VecDeque<StatusEnvelope>>>,
    notify: Arc<Notify>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelope_sink(&self) -> impl Fn(&StatusEnvelope) + Send + Sync + 'static {
        let collector = self.clone();
        move |envelope| {
            collector.items.lock().unwrap().push_back(envelope.clone());
            collector.notify.notify_one();
        }
    }

    pub async fn next(&self) -> StatusEnvelope {
        loop {
            if let Some(envelope) = self.items.lock().unwrap().pop_front() {
                return envelope;
            }
            timeout(WAIT, self.notify.notified())
                .await
                .expect("no envelope delivered");
        }
    }

    pub fn drain(&self) -> Vec<StatusEnvelope> {
        self.items.lock().unwrap().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}

/// Formatted log output captured for the current thread
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Route INFO and above into a buffer until the guard is dropped
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}
