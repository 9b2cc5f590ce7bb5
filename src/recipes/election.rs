//! Leader election over ephemeral sequential nodes.
//!
//! Each candidate creates `<root>/<prefix>-<seq>` and watches only its
//! immediate predecessor, so a leader change wakes exactly one candidate.
//! Whenever a predecessor watch fires the full child list is read again;
//! several predecessors may have gone at once.
//!
//! # Example
//!
//! ```ignore
//! use zkwire_client::recipes::LeaderElection;
//!
//! let election = LeaderElection::new(client.clone(), "/election/service", "n", b"host-a".to_vec())?;
//! election.subscribe(Arc::new(|| println!("now leading")));
//! election.start().await?;
//! election.wait_for_leadership().await?;
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::{Client, CreateMode};
use crate::codec::acl::OPEN_ACL_UNSAFE;
use crate::error::{ErrorCode, Result, ZkError};
use crate::path::{basename, join, validate_path};
use crate::watch::{EventType, WatchKind, WatchedEvent, Watcher};

/// Ownership state of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionState {
    /// Not started.
    Idle,
    /// Watching a predecessor.
    Waiting,
    Owner,
    /// Closed, or the session ended.
    Closed,
}

/// Notified once when this candidate becomes leader.
pub trait LeaderWatcher: Send + Sync + 'static {
    fn take_leadership(&self);
}

impl<F> LeaderWatcher for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn take_leadership(&self) {
        self()
    }
}

/// This candidate's node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionCandidate {
    /// Full path of the candidate node.
    pub path: String,
    /// Server-assigned sequence number.
    pub sequence: u64,
}

struct Inner {
    client: Client,
    root: String,
    prefix: String,
    data: Vec<u8>,
    subscribers: Mutex<Vec<Arc<dyn LeaderWatcher>>>,
    candidate: Mutex<Option<ElectionCandidate>>,
    state: watch::Sender<ElectionState>,
    /// Serializes evaluations so two triggers never interleave.
    evaluating: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// One candidate in an election.
pub struct LeaderElection {
    inner: Arc<Inner>,
}

impl LeaderElection {
    /// Prepare a candidate under `root`. Nothing is sent until `start`.
    pub fn new(
        client: Client,
        root: &str,
        prefix: &str,
        data: Vec<u8>,
    ) -> Result<Self> {
        validate_path(root, false)?;
        if prefix.is_empty() || prefix.contains('/') {
            return Err(ZkError::BadArguments(format!(
                "invalid election prefix {:?}",
                prefix
            )));
        }
        let (state, _) = watch::channel(ElectionState::Idle);
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                root: root.to_string(),
                prefix: prefix.to_string(),
                data,
                subscribers: Mutex::new(Vec::new()),
                candidate: Mutex::new(None),
                state,
                evaluating: tokio::sync::Mutex::new(()),
                monitor: Mutex::new(None),
            }),
        })
    }

    pub fn subscribe(&self, watcher: Arc<dyn LeaderWatcher>) {
        self.inner.subscribers.lock().push(watcher);
    }

    /// Create the candidate node and run the first evaluation.
    ///
    /// If the create fails with connection loss the node may still exist on
    /// the server; it disappears with the session.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        // Held until the node is recorded so a concurrent start sees it.
        let guard = inner.evaluating.lock().await;
        if self.state() != ElectionState::Idle || inner.candidate.lock().is_some() {
            return Err(ZkError::BadArguments("election already started".into()));
        }

        ensure_root(&inner.client, &inner.root).await?;
        let node_prefix = join(&inner.root, &format!("{}-", inner.prefix));
        let path = inner
            .client
            .create(&node_prefix, &inner.data, &OPEN_ACL_UNSAFE, CreateMode::EphemeralSequential)
            .await?;
        let sequence = parse_sequence(&inner.prefix, basename(&path)).ok_or_else(|| {
            ZkError::Protocol(format!("server returned unexpected node name {}", path))
        })?;
        tracing::debug!("Election candidate {} has sequence {}", path, sequence);
        *inner.candidate.lock() = Some(ElectionCandidate { path, sequence });

        let monitor = tokio::spawn(monitor_session(Arc::downgrade(inner), inner.client.state_changes()));
        *inner.monitor.lock() = Some(monitor);
        drop(guard);

        settle(inner).await
    }

    /// Delete the candidate node and stop participating.
    ///
    /// A failed delete is logged and ignored; the node is ephemeral.
    pub async fn close(&self) {
        let inner = &self.inner;
        let _guard = inner.evaluating.lock().await;
        inner.state.send_replace(ElectionState::Closed);
        if let Some(monitor) = inner.monitor.lock().take() {
            monitor.abort();
        }

        let candidate = inner.candidate.lock().take();
        if let Some(candidate) = candidate {
            match inner.client.delete(&candidate.path, None).await {
                Ok(()) | Err(ZkError::Operation(ErrorCode::NoNode)) => {}
                Err(e) => tracing::warn!("Failed to delete election node {}: {}", candidate.path, e),
            }
        }
        inner.subscribers.lock().clear();
    }

    pub fn state(&self) -> ElectionState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ElectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_owner(&self) -> bool {
        self.state() == ElectionState::Owner
    }

    /// Wait until this candidate leads. Fails with `ConnectionClosed` if the
    /// election closes first.
    pub async fn wait_for_leadership(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        let state = *rx
            .wait_for(|s| matches!(s, ElectionState::Owner | ElectionState::Closed))
            .await
            .map_err(|_| ZkError::ConnectionClosed)?;
        match state {
            ElectionState::Owner => Ok(()),
            _ => Err(ZkError::ConnectionClosed),
        }
    }

    pub fn candidate(&self) -> Option<ElectionCandidate> {
        self.inner.candidate.lock().clone()
    }
}

/// Sequence number of `name` if it belongs to `prefix`.
fn parse_sequence(prefix: &str, name: &str) -> Option<u64> {
    let digits = name.strip_prefix(prefix)?.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Create `root` and its ancestors as persistent nodes where missing.
async fn ensure_root(client: &Client, root: &str) -> Result<()> {
    let mut current = String::new();
    for segment in root.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match client
            .create(&current, &[], &OPEN_ACL_UNSAFE, CreateMode::Persistent)
            .await
        {
            Ok(_) | Err(ZkError::Operation(ErrorCode::NodeExists)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

enum Step {
    Settled,
    Retry,
}

/// Evaluate until a decision holds, waiting out connection loss.
async fn settle(inner: &Arc<Inner>) -> Result<()> {
    loop {
        match evaluate(inner).await {
            Ok(Step::Settled) => return Ok(()),
            Ok(Step::Retry) => continue,
            Err(e) if e.is_connection_loss() => {
                tracing::debug!("Election evaluation interrupted: {}", e);
                inner.client.wait_until_connected().await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One pass: read the children, then lead or watch the predecessor.
async fn evaluate(inner: &Arc<Inner>) -> Result<Step> {
    let _guard = inner.evaluating.lock().await;
    if matches!(*inner.state.borrow(), ElectionState::Owner | ElectionState::Closed) {
        return Ok(Step::Settled);
    }
    let Some(own) = inner.candidate.lock().clone() else {
        return Ok(Step::Settled);
    };

    let children = inner.client.get_children(&inner.root, None).await?;
    let mut candidates: Vec<(u64, String)> = children
        .into_iter()
        .filter_map(|name| parse_sequence(&inner.prefix, &name).map(|seq| (seq, name)))
        .collect();
    candidates.sort_unstable();

    let Some(position) = candidates.iter().position(|(seq, _)| *seq == own.sequence) else {
        tracing::warn!("Election node {} no longer exists", own.path);
        inner.state.send_replace(ElectionState::Closed);
        return Ok(Step::Settled);
    };

    if position == 0 {
        become_owner(inner);
        return Ok(Step::Settled);
    }

    let predecessor = join(&inner.root, &candidates[position - 1].1);
    let watcher: Arc<dyn Watcher> = Arc::new(PredecessorWatcher {
        election: Arc::downgrade(inner),
    });
    match inner.client.exists(&predecessor, Some(watcher.clone())).await? {
        Some(_) => {
            tracing::debug!("Election node {} waits on {}", own.path, predecessor);
            transition(inner, ElectionState::Waiting);
            Ok(Step::Settled)
        }
        None => {
            // Gone between the listing and the watch; the creation watch
            // would never fire.
            inner.client.remove_watch(&predecessor, WatchKind::Exist, &watcher);
            Ok(Step::Retry)
        }
    }
}

fn transition(inner: &Inner, next: ElectionState) -> bool {
    inner.state.send_if_modified(|state| {
        if *state == ElectionState::Closed || *state == next {
            return false;
        }
        *state = next;
        true
    })
}

fn become_owner(inner: &Inner) {
    if !transition(inner, ElectionState::Owner) {
        return;
    }
    tracing::info!("Took leadership of {}", inner.root);
    let subscribers = inner.subscribers.lock().clone();
    for subscriber in subscribers {
        subscriber.take_leadership();
    }
}

/// Re-evaluates when the watched predecessor changes.
struct PredecessorWatcher {
    election: Weak<Inner>,
}

impl Watcher for PredecessorWatcher {
    fn process(&self, event: WatchedEvent) {
        if event.event_type == EventType::None {
            return;
        }
        let Some(inner) = self.election.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = settle(&inner).await {
                tracing::warn!("Election re-evaluation on {} failed: {}", inner.root, e);
            }
        });
    }
}

/// Mark the election closed once the session ends.
async fn monitor_session(
    election: Weak<Inner>,
    mut session: watch::Receiver<crate::session::SessionState>,
) {
    let _ = session.wait_for(|s| s.is_terminal()).await;
    if let Some(inner) = election.upgrade() {
        if inner.state.send_replace(ElectionState::Closed) != ElectionState::Closed {
            tracing::info!("Election on {} ended with the session", inner.root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("n", "n-0000000007"), Some(7));
        assert_eq!(parse_sequence("n", "n-0000000000"), Some(0));
        assert_eq!(parse_sequence("n", "m-0000000007"), None);
        assert_eq!(parse_sequence("n", "n0000000007"), None);
        assert_eq!(parse_sequence("n", "n-"), None);
        assert_eq!(parse_sequence("n", "n-12a"), None);
        assert_eq!(parse_sequence("lock", "lock-0000000042"), Some(42));
    }

    #[test]
    fn test_closure_leader_watcher() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let watcher: Arc<dyn LeaderWatcher> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        watcher.take_leadership();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_validates_arguments() {
        let client = Client::builder("127.0.0.1:1").build().unwrap();

        assert!(LeaderElection::new(client.clone(), "election", "n", vec![]).is_err());
        assert!(LeaderElection::new(client.clone(), "/election", "", vec![]).is_err());
        assert!(LeaderElection::new(client.clone(), "/election", "a/b", vec![]).is_err());

        let election = LeaderElection::new(client.clone(), "/election", "n", vec![]).unwrap();
        assert_eq!(election.state(), ElectionState::Idle);
        assert!(!election.is_owner());
        assert!(election.candidate().is_none());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_before_start_releases_waiters() {
        let client = Client::builder("127.0.0.1:1").build().unwrap();
        let election = LeaderElection::new(client.clone(), "/election", "n", vec![]).unwrap();

        election.close().await;
        assert!(matches!(
            election.wait_for_leadership().await,
            Err(ZkError::ConnectionClosed)
        ));
        client.close().await.unwrap();
    }
}
