//! Watch module - one-shot change subscriptions.
//!
//! - [`Watcher`] - the subscriber trait (closures and channels implement it)
//! - [`WatchedEvent`] - what a subscriber receives
//! - [`WatchRegistry`] - the client's path-scoped subscription table

mod event;
mod registry;

pub use event::{channel_watcher, ChannelWatcher, EventType, KeeperState, WatchedEvent, Watcher};
pub use registry::{RearmTarget, WatchKind, WatchRegistry};

pub(crate) use event::same_watcher;
