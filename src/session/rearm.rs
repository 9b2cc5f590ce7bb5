//! Re-arming watches after a session-preserving reconnect.
//!
//! Every path with a live subscription gets a fresh `exists` (data and
//! existence watches) or `getChildren2` (child watches) with the watch flag
//! set. Each reply is compared with the last zxid the client saw before the
//! connection dropped, and changes missed while disconnected fire at once.

use crate::codec::records::{ExistsRequest, GetChildrenRequest};
use crate::error::{ErrorCode, Result};
use crate::ops::{Op, Response};
use crate::path::prepend_chroot;
use crate::pipeline::Completion;
use crate::watch::{EventType, WatchKind, WatchedEvent};

use super::shared::Shared;

/// What a re-arm reply is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RearmCheck {
    /// Client-side path.
    pub path: String,
    /// Last zxid seen before the disconnect.
    pub since_zxid: i64,
    /// Child watches (`getChildren2`) rather than data/existence (`exists`).
    pub children: bool,
}

/// Requests that re-arm every current subscription.
pub(crate) fn plan(shared: &Shared, since_zxid: i64) -> Vec<(Op, Completion)> {
    let targets = shared.watches.lock().rearm_targets();
    let mut requests = Vec::with_capacity(targets.len());
    for target in targets {
        let server_path = prepend_chroot(shared.chroot(), &target.path);
        if target.node {
            requests.push((
                Op::Exists(ExistsRequest {
                    path: server_path.clone(),
                    watch: true,
                }),
                Completion::Rearm(RearmCheck {
                    path: target.path.clone(),
                    since_zxid,
                    children: false,
                }),
            ));
        }
        if target.children {
            requests.push((
                Op::GetChildren2(GetChildrenRequest {
                    path: server_path,
                    watch: true,
                }),
                Completion::Rearm(RearmCheck {
                    path: target.path,
                    since_zxid,
                    children: true,
                }),
            ));
        }
    }
    requests
}

/// Which event, if any, a re-arm reply reveals.
fn missed_event(
    check: &RearmCheck,
    code: ErrorCode,
    result: &Result<Response>,
    has_data: bool,
    has_exist: bool,
) -> Option<EventType> {
    if check.children {
        return match (code, result) {
            (ErrorCode::NoNode, _) => Some(EventType::NodeDeleted),
            (_, Ok(Response::Children2(_, stat))) if stat.pzxid > check.since_zxid => {
                Some(EventType::NodeChildrenChanged)
            }
            _ => None,
        };
    }

    match (code, result) {
        (ErrorCode::NoNode, _) if has_data => Some(EventType::NodeDeleted),
        (_, Ok(Response::Stat(_))) if has_exist => Some(EventType::NodeCreated),
        (_, Ok(Response::Stat(stat))) if has_data && stat.mzxid > check.since_zxid => {
            Some(EventType::NodeDataChanged)
        }
        _ => None,
    }
}

/// Check one re-arm reply and fire whatever changed while disconnected.
pub(crate) fn apply(shared: &Shared, check: RearmCheck, code: ErrorCode, result: Result<Response>) {
    if let Err(e) = &result {
        if code != ErrorCode::NoNode {
            tracing::warn!("Re-arming watch on {} failed: {}", check.path, e);
            return;
        }
    }

    let (has_data, has_exist) = {
        let watches = shared.watches.lock();
        (
            watches.has(&check.path, WatchKind::Data),
            watches.has(&check.path, WatchKind::Exist),
        )
    };

    let Some(event_type) = missed_event(&check, code, &result, has_data, has_exist) else {
        tracing::debug!("Re-armed watch on {}", check.path);
        return;
    };

    let event = WatchedEvent::node(event_type, check.path);
    let watchers = shared.watches.lock().materialize(&event);
    tracing::debug!(
        "Change missed while disconnected: {:?} on {:?}",
        event.event_type,
        event.path
    );
    for watcher in watchers {
        watcher.process(event.clone());
    }
}
