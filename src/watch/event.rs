//! Watch events and the subscriber trait.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::codec::records::WatcherEvent;
use crate::error::{Result, ZkError};

/// What happened to the watched node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Session state change, not tied to a node.
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

impl EventType {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            -1 => Ok(Self::None),
            1 => Ok(Self::NodeCreated),
            2 => Ok(Self::NodeDeleted),
            3 => Ok(Self::NodeDataChanged),
            4 => Ok(Self::NodeChildrenChanged),
            other => Err(ZkError::Protocol(format!("Unknown event type {}", other))),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::None => -1,
            Self::NodeCreated => 1,
            Self::NodeDeleted => 2,
            Self::NodeDataChanged => 3,
            Self::NodeChildrenChanged => 4,
        }
    }
}

/// Connection state carried with every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeeperState {
    Disconnected,
    SyncConnected,
    AuthFailed,
    ConnectedReadOnly,
    Expired,
    /// Client-side only: the client was closed.
    Closed,
}

impl KeeperState {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Disconnected),
            3 => Ok(Self::SyncConnected),
            4 => Ok(Self::AuthFailed),
            5 => Ok(Self::ConnectedReadOnly),
            -112 => Ok(Self::Expired),
            7 => Ok(Self::Closed),
            other => Err(ZkError::Protocol(format!("Unknown keeper state {}", other))),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Disconnected => 0,
            Self::SyncConnected => 3,
            Self::AuthFailed => 4,
            Self::ConnectedReadOnly => 5,
            Self::Expired => -112,
            Self::Closed => 7,
        }
    }
}

/// A change notification delivered to a [`Watcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub state: KeeperState,
    /// Client-side path (chroot removed); `None` for session events.
    pub path: Option<String>,
}

impl WatchedEvent {
    /// A node event in the connected state.
    pub fn node(event_type: EventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            state: KeeperState::SyncConnected,
            path: Some(path.into()),
        }
    }

    /// A session state event.
    pub fn session(state: KeeperState) -> Self {
        Self {
            event_type: EventType::None,
            state,
            path: None,
        }
    }

    /// Decode the wire record.
    pub fn from_record(record: WatcherEvent) -> Result<Self> {
        Ok(Self {
            event_type: EventType::from_code(record.event_type)?,
            state: KeeperState::from_code(record.state)?,
            path: if record.path.is_empty() {
                None
            } else {
                Some(record.path)
            },
        })
    }
}

/// Subscriber for watch and session events.
///
/// `process` runs on the connection's I/O task; it must not block. Spawn a
/// task or forward to a channel for anything slow.
pub trait Watcher: Send + Sync + 'static {
    fn process(&self, event: WatchedEvent);
}

impl<F> Watcher for F
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    fn process(&self, event: WatchedEvent) {
        self(event)
    }
}

/// Watcher that forwards every event into an unbounded channel.
pub struct ChannelWatcher {
    tx: mpsc::UnboundedSender<WatchedEvent>,
}

impl Watcher for ChannelWatcher {
    fn process(&self, event: WatchedEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Create a watcher backed by a channel, plus the receiving end.
pub fn channel_watcher() -> (Arc<dyn Watcher>, mpsc::UnboundedReceiver<WatchedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelWatcher { tx }), rx)
}

/// Identity comparison for shared subscribers.
#[inline]
pub(crate) fn same_watcher(a: &Arc<dyn Watcher>, b: &Arc<dyn Watcher>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
