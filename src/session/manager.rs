//! Connection manager task.
//!
//! Owns the socket lifecycle for one client: connect and handshake, the
//! connected loop (feeding the writer, keepalive pings, watching the read
//! loop), reconnect with capped backoff, session expiry and close.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::reader::read_loop;
use super::shared::Shared;
use super::{rearm, Backoff, HostProvider, Session, SessionState};
use crate::codec::records::{ConnectRequest, ConnectResponse};
use crate::codec::{decode, encode};
use crate::config::ClientConfig;
use crate::error::{Result, ZkError};
use crate::ops::Op;
use crate::pipeline::{Completion, Teardown};
use crate::protocol::{read_frame, write_frame, xid, PROTOCOL_VERSION};
use crate::transport::ServerStream;
use crate::watch::KeeperState;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Password length the server expects from a client without a session.
const EMPTY_PASSWORD_LEN: usize = 16;

/// Why a connected period ended.
enum Exit {
    Lost(ZkError),
    AuthFailed,
    Closed,
}

fn writer_config(config: &ClientConfig) -> WriterConfig {
    WriterConfig {
        max_pending_frames: config.max_pending_frames,
        channel_capacity: config.channel_capacity,
        backpressure_timeout: config.backpressure_timeout(),
    }
}

/// Time left before an established session expires on the server, counted
/// from the moment its connection dropped. `None` while connected or
/// before the first session exists.
fn remaining_budget(disconnected_at: Option<Instant>, session: &Session) -> Option<Duration> {
    let lost_at = disconnected_at.filter(|_| session.id != 0)?;
    Some(session.timeout.saturating_sub(lost_at.elapsed()))
}

fn expire(shared: &Shared, session: &Session) {
    tracing::info!(
        "Session {:#x} expired: no server reached within {:?}",
        session.id,
        session.timeout
    );
    shared.teardown(Teardown::SessionExpired);
}

/// Run until the session reaches a terminal state.
pub(crate) async fn run(shared: Arc<Shared>, mut hosts: HostProvider) {
    let config = shared.config().clone();
    let mut backoff = Backoff::new(config.initial_backoff(), config.max_backoff());
    let mut disconnected_at: Option<Instant> = None;

    shared.set_state(SessionState::Connecting);

    loop {
        if shared.is_closing() {
            shared.teardown(Teardown::Closed);
            return;
        }

        let session = shared.session();
        let budget = remaining_budget(disconnected_at, &session);
        if budget == Some(Duration::ZERO) {
            expire(&shared, &session);
            return;
        }
        let attempt_timeout = budget.map_or(config.connect_timeout(), |left| {
            left.min(config.connect_timeout())
        });

        let host = hosts.next_host().to_string();
        let attempt = tokio::select! {
            result = connect(&shared, &host, attempt_timeout) => result,
            _ = shared.close_requested() => {
                shared.teardown(Teardown::Closed);
                return;
            }
        };

        match attempt {
            Ok((stream, response)) => {
                if response.time_out <= 0 {
                    tracing::info!("Server {} refused session {:#x}", host, session.id);
                    shared.teardown(Teardown::SessionExpired);
                    return;
                }
                if session.id != 0 && response.session_id != session.id {
                    // Watches and ephemerals belonged to the old session.
                    tracing::warn!(
                        "Server {} replaced session {:#x} with {:#x}",
                        host,
                        session.id,
                        response.session_id
                    );
                    shared.teardown(Teardown::SessionExpired);
                    return;
                }

                let reestablished = session.id != 0;
                shared.establish(&response);
                backoff.reset();
                disconnected_at = None;
                tracing::info!(
                    "Connected to {} with session {:#x}, timeout {}ms",
                    host,
                    response.session_id,
                    response.time_out
                );

                match run_connected(&shared, stream, reestablished, session.last_zxid).await {
                    Exit::Lost(e) => {
                        tracing::warn!("Connection to {} lost: {}", host, e);
                        disconnected_at = Some(Instant::now());
                        shared.set_state(SessionState::Reconnecting);
                        shared.connection_lost();
                        shared.session_event(KeeperState::Disconnected);
                    }
                    Exit::AuthFailed => {
                        tracing::warn!("Server {} rejected credentials", host);
                        shared.teardown(Teardown::AuthFailed);
                        return;
                    }
                    Exit::Closed => {
                        shared.teardown(Teardown::Closed);
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Connecting to {} failed: {}", host, e);
                shared.set_state(SessionState::Reconnecting);

                let delay = match remaining_budget(disconnected_at, &session) {
                    Some(Duration::ZERO) => {
                        expire(&shared, &session);
                        return;
                    }
                    Some(left) => backoff.next_delay_within(left),
                    None => backoff.next_delay(),
                };
                tracing::debug!("Next connection attempt in {:?}", delay);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shared.close_requested() => {
                        shared.teardown(Teardown::Closed);
                        return;
                    }
                }
            }
        }
    }
}

/// Open a socket and run the handshake, bounded by `timeout`.
async fn connect(
    shared: &Shared,
    host: &str,
    timeout: Duration,
) -> Result<(ServerStream, ConnectResponse)> {
    let config = shared.config();
    let session = shared.session();

    let handshake = async {
        let mut stream = ServerStream::connect(host, timeout).await?;
        let request = ConnectRequest {
            protocol_version: PROTOCOL_VERSION,
            last_zxid_seen: session.last_zxid,
            time_out: config.session_timeout_ms as i32,
            session_id: session.id,
            passwd: if session.password.is_empty() {
                vec![0; EMPTY_PASSWORD_LEN]
            } else {
                session.password.clone()
            },
        };
        write_frame(&mut stream, &encode(&request)).await?;
        let frame = read_frame(&mut stream, config.max_frame_size).await?;
        let response: ConnectResponse = decode(frame.into_payload())?;
        Ok((stream, response))
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| ZkError::Timeout)?
}

/// Queue auth replay and watch re-arming ahead of any waiting request.
fn prime(shared: &Shared, reestablished: bool, since_zxid: i64) {
    let auth: Vec<(i32, Op)> = shared
        .auth_packets()
        .into_iter()
        .map(|packet| (xid::AUTH, Op::Auth(packet)))
        .collect();
    let rearm = if reestablished {
        rearm::plan(shared, since_zxid)
    } else {
        Vec::new()
    };
    if !rearm.is_empty() {
        tracing::debug!("Re-arming {} watch request(s)", rearm.len());
    }
    shared.pipeline.lock().prime(auth, rearm);
}

async fn send_frames(writer: &WriterHandle, frames: Vec<Bytes>) -> Result<()> {
    for payload in frames {
        writer.send(OutboundFrame::new(payload)?).await?;
    }
    Ok(())
}

/// Drive one live connection until it fails or the client closes.
async fn run_connected(
    shared: &Arc<Shared>,
    stream: ServerStream,
    reestablished: bool,
    since_zxid: i64,
) -> Exit {
    let timeout = shared.session().timeout;
    let (read_half, write_half) = stream.into_split();
    let (writer, mut writer_task) = spawn_writer_task(write_half, writer_config(shared.config()));
    let mut reader_task = tokio::spawn(read_loop(shared.clone(), read_half, timeout * 2 / 3));

    prime(shared, reestablished, since_zxid);
    shared.set_state(SessionState::Connected);
    shared.session_event(KeeperState::SyncConnected);

    let ping_interval = timeout / 3;
    let mut last_send = Instant::now();

    let exit = loop {
        let frames = shared.pipeline.lock().take_outgoing();
        if !frames.is_empty() {
            if let Err(e) = send_frames(&writer, frames).await {
                break Exit::Lost(e);
            }
            last_send = Instant::now();
        }

        tokio::select! {
            _ = shared.outbound_ready() => {}
            _ = tokio::time::sleep_until(last_send + ping_interval) => {
                tracing::trace!("Sending ping");
                if let Err(e) = send_frames(&writer, vec![Op::Ping.encode(xid::PING)]).await {
                    break Exit::Lost(e);
                }
                last_send = Instant::now();
            }
            result = &mut reader_task => {
                break match result {
                    Ok(ZkError::AuthFailed) => Exit::AuthFailed,
                    Ok(e) => Exit::Lost(e),
                    Err(e) => Exit::Lost(ZkError::Protocol(format!("Read loop ended: {}", e))),
                };
            }
            result = &mut writer_task => {
                let e = match result {
                    Ok(Ok(())) => ZkError::ConnectionClosed,
                    Ok(Err(e)) => e,
                    Err(e) => ZkError::Protocol(format!("Writer task ended: {}", e)),
                };
                break Exit::Lost(e);
            }
            _ = shared.close_requested() => break Exit::Closed,
        }
    };

    if let Exit::Closed = exit {
        say_goodbye(shared, writer, &mut reader_task).await;
    } else {
        drop(writer);
    }
    reader_task.abort();
    writer_task.abort();
    exit
}

/// Cancel waiting requests, send `closeSession` and wait briefly for the
/// server to hang up.
async fn say_goodbye(
    shared: &Shared,
    writer: WriterHandle,
    reader_task: &mut tokio::task::JoinHandle<ZkError>,
) {
    let (cancelled, frames) = {
        let mut pipeline = shared.pipeline.lock();
        let cancelled = pipeline.fail_all(Teardown::Closed);
        pipeline.insert(&Op::CloseSession, Completion::Discard, None);
        (cancelled, pipeline.take_outgoing())
    };
    for entry in cancelled {
        entry.completion.finish(Err(Teardown::Closed.error()));
    }

    if let Err(e) = send_frames(&writer, frames).await {
        tracing::warn!("Failed to send closeSession: {}", e);
        return;
    }
    // Dropping the last handle lets the writer flush and shut down.
    drop(writer);

    let wait = shared.config().connect_timeout().min(Duration::from_secs(2));
    if tokio::time::timeout(wait, reader_task).await.is_err() {
        tracing::debug!("Server did not close the connection within {:?}", wait);
    }
}
