//! Session configuration, loadable from TOML

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tello_shared::defaults;

/// Which transport shape the console drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Fire-and-forget commands, results arrive as pushed status events
    #[default]
    Push,
    /// Each command awaits a correlated response
    RequestResponse,
}

/// Configuration for a session to the intermediary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionConfig {
    /// Intermediary `host:port`
    pub server: String,
    /// Namespace joined during the handshake
    pub namespace: String,
    pub mode: TransportMode,
    /// Consecutive failed attempts before the session gives up
    pub reconnect_attempts: u32,
    /// Fixed delay between attempts
    pub reconnect_delay_ms: u64,
    /// Transport connect plus handshake timeout
    pub connect_timeout_ms: u64,
    /// Deadline for a correlated response
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: defaults::SERVER.into(),
            namespace: defaults::NAMESPACE.into(),
            mode: TransportMode::Push,
            reconnect_attempts: defaults::RECONNECT_ATTEMPTS,
            reconnect_delay_ms: defaults::RECONNECT_DELAY_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from an address such as `http://localhost:5001/tello`.
    /// The scheme is ignored; the path, if any, is the namespace.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let (server, namespace) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let namespace = namespace.trim_end_matches('/');

        let config = Self {
            server: server.to_string(),
            namespace: if namespace.is_empty() {
                defaults::NAMESPACE.to_string()
            } else {
                namespace.to_string()
            },
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            bail!("`server` must not be empty");
        }
        if !self.namespace.starts_with('/') {
            bail!("`namespace` must start with '/': {}", self.namespace);
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            bail!("timeouts must be greater than zero");
        }
        Ok(())
    }

    /// `server` and `namespace` joined, for logs and status messages
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.server, self.namespace)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
