//! Request pipeline - xid assignment, the pending table and reply dispatch.
//!
//! Submitting assigns an xid and queues the encoded request under one lock,
//! so outbound order equals submission order. Replies are matched by xid
//! through a `BTreeMap`; nothing assumes they arrive in order.
//!
//! ```text
//! caller ──submit──► Pipeline { pending, outgoing } ──take_outgoing──► writer
//!                         ▲
//! reader ──dispatch───────┘ (complete by xid, register watch, finish)
//! ```

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::codec::records::{ReplyHeader, WatcherEvent};
use crate::codec::{InputArchive, Record};
use crate::error::{ErrorCode, Result, ZkError};
use crate::ops::{Op, Response};
use crate::path::strip_chroot;
use crate::protocol::xid;
use crate::session::rearm::{self, RearmCheck};
use crate::session::shared::Shared;
use crate::watch::{EventType, WatchKind, WatchedEvent, Watcher};

/// Callback run from the I/O task when a reply arrives.
pub(crate) type ReplyCallback = Box<dyn FnOnce(Result<Response>) + Send + 'static>;

/// How a reply reaches whoever submitted the request.
pub(crate) enum Completion {
    /// An awaiting caller.
    Waiter(oneshot::Sender<Result<Response>>),
    /// A callback run on the I/O task.
    Callback(ReplyCallback),
    /// Internal re-arm request issued after a reconnect.
    Rearm(RearmCheck),
    /// Nobody is interested in the reply.
    Discard,
}

impl Completion {
    pub fn finish(self, result: Result<Response>) {
        match self {
            // Receiver gone means the caller timed out.
            Completion::Waiter(tx) => {
                let _ = tx.send(result);
            }
            Completion::Callback(callback) => callback(result),
            Completion::Rearm(_) | Completion::Discard => {}
        }
    }
}

/// Which operation a watch was requested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchTarget {
    Data,
    Exists,
    Child,
}

/// A watch that becomes active only once the reply allows it.
pub(crate) struct WatchRegistration {
    /// Client-side path.
    pub path: String,
    pub target: WatchTarget,
    pub watcher: Arc<dyn Watcher>,
}

impl WatchRegistration {
    /// Subscription kind for a reply with `code`, if the watch is set.
    pub fn kind_for(&self, code: ErrorCode) -> Option<WatchKind> {
        match (self.target, code) {
            (WatchTarget::Data, ErrorCode::Ok) => Some(WatchKind::Data),
            (WatchTarget::Exists, ErrorCode::Ok) => Some(WatchKind::Data),
            (WatchTarget::Exists, ErrorCode::NoNode) => Some(WatchKind::Exist),
            (WatchTarget::Child, ErrorCode::Ok) => Some(WatchKind::Child),
            _ => None,
        }
    }
}

/// An outstanding request.
pub(crate) struct PendingRequest {
    pub xid: i32,
    pub opcode: i32,
    pub completion: Completion,
    pub watch: Option<WatchRegistration>,
    /// Handed to the writer on the current connection.
    sent: bool,
}

impl PendingRequest {
    fn is_rearm(&self) -> bool {
        matches!(self.completion, Completion::Rearm(_))
    }
}

/// Terminal reason for cancelling every request. Connection loss is not
/// terminal and goes through [`Pipeline::on_connection_lost`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    SessionExpired,
    AuthFailed,
    Closed,
}

impl Teardown {
    pub fn error(self) -> ZkError {
        match self {
            Teardown::SessionExpired => ZkError::SessionExpired,
            Teardown::AuthFailed => ZkError::AuthFailed,
            Teardown::Closed => ZkError::ConnectionClosed,
        }
    }
}

struct Outgoing {
    xid: i32,
    payload: Bytes,
}

/// Pending table plus the queue of encoded requests not yet written.
pub(crate) struct Pipeline {
    next_xid: i32,
    pending: BTreeMap<i32, PendingRequest>,
    outgoing: VecDeque<Outgoing>,
    max_queued: usize,
    terminal: Option<Teardown>,
}

impl Pipeline {
    pub fn new(max_queued: usize) -> Self {
        Self {
            next_xid: xid::FIRST,
            pending: BTreeMap::new(),
            outgoing: VecDeque::new(),
            max_queued,
            terminal: None,
        }
    }

    /// Check that a new request may be queued.
    pub fn admit(&self) -> Result<()> {
        if let Some(reason) = self.terminal {
            return Err(reason.error());
        }
        if self.outgoing.len() >= self.max_queued {
            return Err(ZkError::Backpressure);
        }
        Ok(())
    }

    fn allocate_xid(&mut self) -> i32 {
        loop {
            let candidate = self.next_xid;
            self.next_xid = if candidate == i32::MAX {
                xid::FIRST
            } else {
                candidate + 1
            };
            if !self.pending.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Assign an xid and queue the request behind everything already queued.
    pub fn insert(
        &mut self,
        op: &Op,
        completion: Completion,
        watch: Option<WatchRegistration>,
    ) -> i32 {
        let xid = self.allocate_xid();
        let payload = op.encode(xid);
        self.pending.insert(
            xid,
            PendingRequest {
                xid,
                opcode: op.opcode(),
                completion,
                watch,
                sent: false,
            },
        );
        self.outgoing.push_back(Outgoing { xid, payload });
        xid
    }

    /// Queue requests ahead of everything already queued, keeping their
    /// relative order. Used for auth replay and watch re-arming.
    pub fn prime(&mut self, reserved: Vec<(i32, Op)>, requests: Vec<(Op, Completion)>) {
        let mut front = Vec::with_capacity(reserved.len() + requests.len());
        for (xid, op) in reserved {
            front.push(Outgoing {
                xid,
                payload: op.encode(xid),
            });
        }
        for (op, completion) in requests {
            let xid = self.allocate_xid();
            front.push(Outgoing {
                xid,
                payload: op.encode(xid),
            });
            self.pending.insert(
                xid,
                PendingRequest {
                    xid,
                    opcode: op.opcode(),
                    completion,
                    watch: None,
                    sent: false,
                },
            );
        }
        for entry in front.into_iter().rev() {
            self.outgoing.push_front(entry);
        }
    }

    /// Queue a request carrying a reserved xid (no pending entry).
    pub fn enqueue_reserved(&mut self, reserved_xid: i32, op: &Op) {
        self.outgoing.push_back(Outgoing {
            xid: reserved_xid,
            payload: op.encode(reserved_xid),
        });
    }

    /// Drain the queue for the writer, marking requests as sent.
    pub fn take_outgoing(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(self.outgoing.len());
        while let Some(Outgoing { xid, payload }) = self.outgoing.pop_front() {
            if let Some(entry) = self.pending.get_mut(&xid) {
                entry.sent = true;
            }
            frames.push(payload);
        }
        frames
    }

    /// Remove the pending entry for `xid`, exactly once.
    pub fn complete(&mut self, xid: i32) -> Option<PendingRequest> {
        self.pending.remove(&xid)
    }

    /// The connection dropped. Requests already handed to the writer are
    /// returned for failing with `ConnectionLoss`; queued ones stay queued.
    /// Re-arm and reserved frames are dropped since a reconnect rebuilds them.
    pub fn on_connection_lost(&mut self) -> Vec<PendingRequest> {
        let lost: Vec<i32> = self
            .pending
            .values()
            .filter(|entry| entry.sent || entry.is_rearm())
            .map(|entry| entry.xid)
            .collect();

        let mut failed = Vec::with_capacity(lost.len());
        for xid in &lost {
            if let Some(entry) = self.pending.remove(xid) {
                failed.push(entry);
            }
        }

        let lost: HashSet<i32> = lost.into_iter().collect();
        self.outgoing
            .retain(|o| !xid::is_reserved(o.xid) && !lost.contains(&o.xid));
        failed
    }

    /// Terminal teardown: refuse new requests and return every pending one.
    pub fn fail_all(&mut self, reason: Teardown) -> Vec<PendingRequest> {
        self.terminal.get_or_insert(reason);
        self.outgoing.clear();
        std::mem::take(&mut self.pending).into_values().collect()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn queued(&self) -> usize {
        self.outgoing.len()
    }

    #[cfg(test)]
    pub(crate) fn set_next_xid(&mut self, next: i32) {
        self.next_xid = next;
    }
}

/// Route one inbound frame: notification, ping, auth reply or a pending
/// request's reply.
///
/// Returns an error only when the connection must be abandoned.
pub(crate) fn dispatch(shared: &Shared, payload: Bytes) -> Result<()> {
    let mut input = InputArchive::new(payload);
    let header = ReplyHeader::deserialize(&mut input)?;
    if header.zxid > 0 {
        shared.observe_zxid(header.zxid);
    }

    match header.xid {
        xid::NOTIFICATION => {
            let mut event = WatchedEvent::from_record(WatcherEvent::deserialize(&mut input)?)?;
            if event.event_type == EventType::None {
                tracing::debug!("Ignoring server session event {:?}", event.state);
                return Ok(());
            }
            event.path = event.path.map(|p| strip_chroot(shared.chroot(), &p));
            let watchers = shared.watches.lock().materialize(&event);
            tracing::debug!(
                "Watch event {:?} on {:?} fires {} subscriber(s)",
                event.event_type,
                event.path,
                watchers.len()
            );
            for watcher in watchers {
                watcher.process(event.clone());
            }
            Ok(())
        }
        xid::PING => {
            tracing::trace!("Ping reply");
            Ok(())
        }
        xid::AUTH => match ErrorCode::from_code(header.err) {
            ErrorCode::Ok => Ok(()),
            ErrorCode::AuthFailed => Err(ZkError::AuthFailed),
            other => {
                tracing::warn!("Auth reply with error {}", other);
                Ok(())
            }
        },
        request_xid => {
            let entry = shared.pipeline.lock().complete(request_xid);
            let Some(entry) = entry else {
                tracing::warn!("Dropping reply for unknown xid {}", request_xid);
                return Ok(());
            };

            let code = ErrorCode::from_code(header.err);
            let result = if code == ErrorCode::Ok {
                match Response::decode(entry.opcode, &mut input) {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        let message = format!("Malformed reply for xid {}: {}", request_xid, e);
                        entry.completion.finish(Err(ZkError::Protocol(message.clone())));
                        return Err(ZkError::Protocol(message));
                    }
                }
            } else {
                Err(ZkError::from(code))
            };

            if let Some(registration) = entry.watch {
                if let Some(kind) = registration.kind_for(code) {
                    shared
                        .watches
                        .lock()
                        .register(&registration.path, kind, registration.watcher);
                }
            }

            match entry.completion {
                Completion::Rearm(check) => rearm::apply(shared, check, code, result),
                completion => completion.finish(result),
            }
            Ok(())
        }
    }
}
