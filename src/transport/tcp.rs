//! TCP transport to the intermediary

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[async_trait]
impl TransportStream for TcpStream {
    async fn shutdown(&mut self) -> Result<()> {
        AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// TCP connector for a `host:port` intermediary address
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<Self::Stream> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("connect to {}", self.address))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_connector_name() {
        let connector = TcpConnector::new("127.0.0.1:5001");
        assert_eq!(connector.name(), "TCP");
        assert_eq!(connector.address(), "127.0.0.1:5001");
    }

    #[tokio::test]
    async fn test_tcp_connect_and_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = TcpConnector::new(addr.to_string());
        let (client, accepted) = tokio::join!(connector.connect(), listener.accept());
        let mut client = client.expect("connect failed");
        let (mut server, _) = accepted.expect("accept failed");

        TransportStream::shutdown(&mut client).await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpConnector::new(addr.to_string()).connect().await.unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()));
    }
}
