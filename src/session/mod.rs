//! Session module - connection lifecycle and the resumable session.
//!
//! - [`SessionState`] - the connection state machine, published on a
//!   `tokio::sync::watch` channel
//! - [`ConnectString`] - host list and optional chroot
//! - the connection manager task (handshake, keepalive, reconnect, expiry)
//!
//! ```text
//!  Disconnected ──start──► Connecting ──handshake──► Connected
//!                              │                      │  ▲
//!                      failure ▼          I/O failure ▼  │ same session id
//!                         Reconnecting ◄──────────────┘  │
//!                              │ └───────────────────────┘
//!             budget exhausted ▼
//!                           Expired          (any) ──close──► Closed
//! ```

mod backoff;
mod hosts;
pub(crate) mod manager;
pub(crate) mod reader;
pub(crate) mod rearm;
pub(crate) mod shared;

use std::fmt;
use std::time::Duration;

pub use backoff::Backoff;
pub use hosts::ConnectString;
pub(crate) use hosts::HostProvider;

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not started yet.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    Connected,
    /// Connection lost; the session may still be resumed.
    Reconnecting,
    /// The server discarded the session. Terminal.
    Expired,
    /// The server rejected the credentials. Terminal.
    AuthFailed,
    /// Closed by the application. Terminal.
    Closed,
}

impl SessionState {
    /// True for states that never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::AuthFailed | Self::Closed)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session identity kept across reconnects.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// 0 until the server assigns one.
    pub id: i64,
    pub password: Vec<u8>,
    /// Negotiated timeout (the requested one before the first handshake).
    pub timeout: Duration,
    /// Highest zxid seen in any reply.
    pub last_zxid: i64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &format_args!("{:#x}", self.id))
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("last_zxid", &self.last_zxid)
            .finish()
    }
}
