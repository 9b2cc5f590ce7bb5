//! Client configuration.
//!
//! Every field has a default, so a JSON document only needs the keys it
//! wants to change:
//!
//! ```
//! use zkwire_client::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{
//!     "connect_string": "10.0.0.1:2181,10.0.0.2:2181/app",
//!     "session_timeout_ms": 10000
//! }"#).unwrap();
//! assert_eq!(config.session_timeout_ms, 10_000);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ZkError};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::{DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_FRAMES};

/// Default requested session timeout.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;

/// Default bound on requests waiting to be handed to the writer.
pub const DEFAULT_MAX_QUEUED_REQUESTS: usize = 4096;

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port[,host:port...][/chroot]`
    pub connect_string: String,
    /// Requested session timeout. The server may negotiate it down or up.
    pub session_timeout_ms: u64,
    /// Largest inbound frame accepted.
    pub max_frame_size: usize,
    /// Frames buffered between the connection task and the writer task.
    pub max_pending_frames: usize,
    /// Capacity of the writer channel.
    pub channel_capacity: usize,
    /// Longest wait for room in the writer channel before the connection
    /// counts as stalled.
    pub backpressure_timeout_ms: u64,
    /// Requests waiting to be sent; submits beyond this fail with `Backpressure`.
    pub max_queued_requests: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Limit for one TCP connect plus handshake.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_string: "127.0.0.1:2181".to_string(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
            max_queued_requests: DEFAULT_MAX_QUEUED_REQUESTS,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ZkError::BadArguments(format!("Invalid client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.connect_string.trim().is_empty() {
            return Err(ZkError::BadArguments("connect_string is empty".into()));
        }
        if self.session_timeout_ms == 0 || self.session_timeout_ms > i32::MAX as u64 {
            return Err(ZkError::BadArguments(format!(
                "session_timeout_ms out of range: {}",
                self.session_timeout_ms
            )));
        }
        if self.max_pending_frames == 0 || self.channel_capacity == 0 || self.max_queued_requests == 0 {
            return Err(ZkError::BadArguments("queue bounds must be positive".into()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ZkError::BadArguments(
                "initial_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
