//! Client-side table of one-shot watch subscriptions.
//!
//! The table is owned by a single client and mutated only under that
//! client's lock. Firing a watch removes it before the subscriber is handed
//! back to the caller for notification.

use std::collections::HashMap;
use std::sync::Arc;

use super::event::{same_watcher, EventType, WatchedEvent, Watcher};

/// Which server-side watch a subscription corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// `get_data`, or `exists` on a node that exists.
    Data,
    /// `exists` on a node that does not exist yet.
    Exist,
    /// `get_children`.
    Child,
}

/// One path's worth of work for re-arming after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RearmTarget {
    pub path: String,
    /// Data or existence watches are present (re-armed with `exists`).
    pub node: bool,
    /// Child watches are present (re-armed with `get_children2`).
    pub children: bool,
}

type Subscribers = Vec<Arc<dyn Watcher>>;

/// Maps path to the set of `(kind, subscriber)` pairs.
#[derive(Default)]
pub struct WatchRegistry {
    data: HashMap<String, Subscribers>,
    exist: HashMap<String, Subscribers>,
    child: HashMap<String, Subscribers>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: WatchKind) -> &HashMap<String, Subscribers> {
        match kind {
            WatchKind::Data => &self.data,
            WatchKind::Exist => &self.exist,
            WatchKind::Child => &self.child,
        }
    }

    fn table_mut(&mut self, kind: WatchKind) -> &mut HashMap<String, Subscribers> {
        match kind {
            WatchKind::Data => &mut self.data,
            WatchKind::Exist => &mut self.exist,
            WatchKind::Child => &mut self.child,
        }
    }

    /// Add a subscription. Registering the same subscriber twice for the same
    /// path and kind is a no-op.
    pub fn register(&mut self, path: &str, kind: WatchKind, watcher: Arc<dyn Watcher>) {
        let subscribers = self.table_mut(kind).entry(path.to_string()).or_default();
        if !subscribers.iter().any(|w| same_watcher(w, &watcher)) {
            subscribers.push(watcher);
        }
    }

    /// Remove one subscription. Returns `true` if it was present.
    pub fn remove(&mut self, path: &str, kind: WatchKind, watcher: &Arc<dyn Watcher>) -> bool {
        let table = self.table_mut(kind);
        let Some(subscribers) = table.get_mut(path) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|w| !same_watcher(w, watcher));
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            table.remove(path);
        }
        removed
    }

    /// True if `watcher` is subscribed to `path` for `kind`.
    pub fn contains(&self, path: &str, kind: WatchKind, watcher: &Arc<dyn Watcher>) -> bool {
        self.table(kind)
            .get(path)
            .is_some_and(|subs| subs.iter().any(|w| same_watcher(w, watcher)))
    }

    /// True if `path` has any subscriber of `kind`.
    pub fn has(&self, path: &str, kind: WatchKind) -> bool {
        self.table(kind).contains_key(path)
    }

    /// Remove and return every subscriber of `kinds` on `path`, each at most once.
    pub fn take(&mut self, path: &str, kinds: &[WatchKind]) -> Vec<Arc<dyn Watcher>> {
        let mut fired: Subscribers = Vec::new();
        for kind in kinds {
            if let Some(subscribers) = self.table_mut(*kind).remove(path) {
                for watcher in subscribers {
                    if !fired.iter().any(|w| same_watcher(w, &watcher)) {
                        fired.push(watcher);
                    }
                }
            }
        }
        fired
    }

    /// Resolve a node event to the subscribers it fires, removing them.
    pub fn materialize(&mut self, event: &WatchedEvent) -> Vec<Arc<dyn Watcher>> {
        let Some(path) = event.path.as_deref() else {
            return Vec::new();
        };
        match event.event_type {
            EventType::NodeCreated | EventType::NodeDataChanged => {
                self.take(path, &[WatchKind::Data, WatchKind::Exist])
            }
            EventType::NodeChildrenChanged => self.take(path, &[WatchKind::Child]),
            EventType::NodeDeleted => {
                self.take(path, &[WatchKind::Data, WatchKind::Exist, WatchKind::Child])
            }
            EventType::None => Vec::new(),
        }
    }

    /// Every path with an active subscription, grouped for re-arming.
    pub fn rearm_targets(&self) -> Vec<RearmTarget> {
        let mut targets: HashMap<&str, RearmTarget> = HashMap::new();
        for path in self.data.keys().chain(self.exist.keys()) {
            targets
                .entry(path.as_str())
                .or_insert_with(|| RearmTarget {
                    path: path.clone(),
                    node: false,
                    children: false,
                })
                .node = true;
        }
        for path in self.child.keys() {
            targets
                .entry(path.as_str())
                .or_insert_with(|| RearmTarget {
                    path: path.clone(),
                    node: false,
                    children: false,
                })
                .children = true;
        }
        let mut targets: Vec<_> = targets.into_values().collect();
        targets.sort_by(|a, b| a.path.cmp(&b.path));
        targets
    }

    /// Empty the table, returning each distinct subscriber once.
    pub fn drain_all(&mut self) -> Vec<Arc<dyn Watcher>> {
        let mut all: Subscribers = Vec::new();
        let tables = [
            std::mem::take(&mut self.data),
            std::mem::take(&mut self.exist),
            std::mem::take(&mut self.child),
        ];
        for watcher in tables.into_iter().flat_map(|t| t.into_values()).flatten() {
            if !all.iter().any(|w| same_watcher(w, &watcher)) {
                all.push(watcher);
            }
        }
        all
    }

    /// Number of (path, kind, subscriber) entries.
    pub fn len(&self) -> usize {
        [&self.data, &self.exist, &self.child]
            .iter()
            .flat_map(|t| t.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.exist.is_empty() && self.child.is_empty()
    }
}
