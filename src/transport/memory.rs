//! In-process transport built on `tokio::io::duplex`
//!
//! Each successful `connect` hands the far end of a fresh duplex pipe to the
//! paired [`MemoryListener`], which plays the intermediary.

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Pipe capacity per direction
const PIPE_CAPACITY: usize = 64 * 1024;

#[async_trait]
impl TransportStream for DuplexStream {
    async fn shutdown(&mut self) -> Result<()> {
        AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// Connector side of an in-process link
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<DuplexStream>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

/// Intermediary side of an in-process link
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<DuplexStream>,
}

/// Create a connected connector/listener pair
pub fn channel() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            accept_tx,
            refusing: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        },
        MemoryListener { accept_rx },
    )
}

impl MemoryConnector {
    /// Make subsequent connect attempts fail, as if the intermediary were down
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connect attempts made so far, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MemoryListener {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.accept_rx.recv().await
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<Self::Stream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.refusing.load(Ordering::SeqCst) {
            bail!("connection refused");
        }

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        self.accept_tx
            .send(server)
            .map_err(|_| anyhow!("listener closed"))?;
        Ok(client)
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
