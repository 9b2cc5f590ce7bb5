//! State shared by a client handle, its connection task and its read loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use super::{Session, SessionState};
use crate::codec::records::{AuthPacket, ConnectResponse};
use crate::config::ClientConfig;
use crate::error::{ErrorCode, ZkError};
use crate::ops::Op;
use crate::pipeline::{Completion, Pipeline, Teardown, WatchRegistration};
use crate::protocol::xid;
use crate::watch::{same_watcher, KeeperState, WatchRegistry, WatchedEvent, Watcher};

/// One client's tables and signals. Never global; each `Client` owns one.
pub(crate) struct Shared {
    config: ClientConfig,
    chroot: Option<String>,
    pub(crate) pipeline: Mutex<Pipeline>,
    pub(crate) watches: Mutex<WatchRegistry>,
    session: Mutex<Session>,
    auth: Mutex<Vec<AuthPacket>>,
    state_tx: watch::Sender<SessionState>,
    default_watcher: Option<Arc<dyn Watcher>>,
    outbound: Notify,
    closing: watch::Sender<bool>,
}

impl Shared {
    pub fn new(
        config: ClientConfig,
        chroot: Option<String>,
        session: Session,
        auth: Vec<AuthPacket>,
        default_watcher: Option<Arc<dyn Watcher>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (closing, _) = watch::channel(false);
        Self {
            pipeline: Mutex::new(Pipeline::new(config.max_queued_requests)),
            watches: Mutex::new(WatchRegistry::new()),
            session: Mutex::new(session),
            auth: Mutex::new(auth),
            config,
            chroot,
            state_tx,
            default_watcher,
            outbound: Notify::new(),
            closing,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn chroot(&self) -> Option<&str> {
        self.chroot.as_deref()
    }

    // ---- session state ----

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Publish a new state. Terminal states are never left.
    pub fn set_state(&self, next: SessionState) {
        let mut previous = next;
        self.state_tx.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            previous = *state;
            *state = next;
            true
        });
        if previous != next {
            tracing::info!("Session state {} -> {}", previous, next);
        }
    }

    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    /// Adopt the server's answer to a handshake.
    pub fn establish(&self, response: &ConnectResponse) {
        let mut session = self.session.lock();
        session.id = response.session_id;
        session.password = response.passwd.clone();
        session.timeout = Duration::from_millis(response.time_out.max(0) as u64);
    }

    pub fn observe_zxid(&self, zxid: i64) {
        let mut session = self.session.lock();
        if zxid > session.last_zxid {
            session.last_zxid = zxid;
        }
    }

    // ---- submission ----

    /// Queue a request. Every outcome, including refusal, goes through
    /// `completion`.
    pub fn submit(&self, op: Op, completion: Completion, watch: Option<WatchRegistration>) {
        let mut pipeline = self.pipeline.lock();
        match pipeline.admit() {
            Ok(()) => {
                let xid = pipeline.insert(&op, completion, watch);
                drop(pipeline);
                tracing::debug!("Queued request xid={} op={}", xid, op.opcode());
                self.outbound.notify_one();
            }
            Err(e) => {
                drop(pipeline);
                completion.finish(Err(e));
            }
        }
    }

    /// Remember credentials and send them now if connected. They are
    /// replayed after every reconnect.
    pub fn add_auth(&self, packet: AuthPacket) -> crate::Result<()> {
        let mut pipeline = self.pipeline.lock();
        pipeline.admit()?;
        self.auth.lock().push(packet.clone());
        if self.state().is_connected() {
            pipeline.enqueue_reserved(xid::AUTH, &Op::Auth(packet));
            drop(pipeline);
            self.outbound.notify_one();
        }
        Ok(())
    }

    pub fn auth_packets(&self) -> Vec<AuthPacket> {
        self.auth.lock().clone()
    }

    /// Wait until something is queued for sending.
    pub async fn outbound_ready(&self) {
        self.outbound.notified().await
    }

    pub fn wake_outbound(&self) {
        self.outbound.notify_one();
    }

    // ---- shutdown ----

    pub fn request_close(&self) {
        self.closing.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Resolves once close has been requested.
    pub async fn close_requested(&self) {
        let mut rx = self.closing.subscribe();
        // Sender lives in `self`, so this only ends once the flag is set.
        let _ = rx.wait_for(|closing| *closing).await;
    }

    // ---- notification ----

    /// Deliver a session event to the default watcher.
    pub fn session_event(&self, state: KeeperState) {
        if let Some(watcher) = &self.default_watcher {
            watcher.process(WatchedEvent::session(state));
        }
    }

    /// The connection dropped: fail requests that were in flight.
    pub fn connection_lost(&self) {
        let failed = self.pipeline.lock().on_connection_lost();
        if !failed.is_empty() {
            tracing::debug!("Failing {} in-flight request(s) with connection loss", failed.len());
        }
        for entry in failed {
            entry
                .completion
                .finish(Err(ZkError::Operation(ErrorCode::ConnectionLoss)));
        }
    }

    /// Enter a terminal state: cancel every request, clear every watch and
    /// tell each subscriber once.
    pub fn teardown(&self, reason: Teardown) {
        let (state, keeper) = match reason {
            Teardown::SessionExpired => (SessionState::Expired, KeeperState::Expired),
            Teardown::AuthFailed => (SessionState::AuthFailed, KeeperState::AuthFailed),
            Teardown::Closed => (SessionState::Closed, KeeperState::Closed),
        };

        let failed = self.pipeline.lock().fail_all(reason);
        self.set_state(state);

        for entry in failed {
            entry.completion.finish(Err(reason.error()));
        }

        let watchers = self.watches.lock().drain_all();
        let event = WatchedEvent::session(keeper);
        for watcher in &watchers {
            watcher.process(event.clone());
        }
        if let Some(default) = &self.default_watcher {
            if !watchers.iter().any(|w| same_watcher(w, default)) {
                default.process(event);
            }
        }
    }
}
