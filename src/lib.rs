//! # zkwire-client
//!
//! Asynchronous client for ZooKeeper-style coordination servers.
//!
//! The client keeps one session alive over a single TCP connection,
//! multiplexes concurrent requests by transaction id, delivers one-shot
//! watch notifications and rides out server failover within the session
//! timeout.
//!
//! ## Architecture
//!
//! - **Framing** (`protocol`): 4-byte big-endian length prefix per message
//! - **Records** (`codec`): big-endian binary archive for headers and bodies
//! - **Session** (`session`): connect, keepalive, reconnect and expiry
//! - **Pipeline**: pending requests keyed by xid, FIFO replies
//! - **Watches** (`watch`): client-side subscriber table, re-armed after reconnect
//! - **Recipes** (`recipes`): leader election on ephemeral sequential nodes
//!
//! ## Example
//!
//! ```ignore
//! use zkwire_client::{acl, channel_watcher, Client, CreateMode};
//!
//! #[tokio::main]
//! async fn main() -> zkwire_client::Result<()> {
//!     let client = Client::builder("127.0.0.1:2181").connect().await?;
//!
//!     let (watcher, mut events) = channel_watcher();
//!     client.exists("/ready", Some(watcher)).await?;
//!     client.create("/ready", b"", &acl::OPEN_ACL_UNSAFE, CreateMode::Ephemeral).await?;
//!     println!("{:?}", events.recv().await);
//!
//!     client.close().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod path;
pub mod protocol;
pub mod recipes;
pub mod session;
pub mod transport;
pub mod watch;
pub mod writer;

mod client;
mod ops;
mod pipeline;

pub use client::{Client, ClientBuilder, CreateMode};
pub use codec::acl::{self, Acl, Id};
pub use codec::records::Stat;
pub use config::ClientConfig;
pub use error::{ErrorCode, Result, ZkError};
pub use recipes::{ElectionState, LeaderElection, LeaderWatcher};
pub use session::SessionState;
pub use watch::{channel_watcher, EventType, KeeperState, WatchKind, WatchedEvent, Watcher};
