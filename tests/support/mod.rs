//! In-process fake coordination server.
//!
//! Speaks the same framed wire protocol as a real server and keeps a small
//! node tree with ephemeral and sequential nodes plus one-shot watches kept
//! per connection. Tests can drop connections, refuse new ones, leave
//! handshakes unanswered, mute live connections, or expire a session.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use zkwire_client::codec::records::{
    AuthPacket, ConnectRequest, ConnectResponse, CreateRequest, CreateResponse, DeleteRequest,
    ExistsRequest, ExistsResponse, GetAclRequest, GetAclResponse, GetChildren2Response,
    GetChildrenRequest, GetChildrenResponse, GetDataRequest, GetDataResponse, ReplyHeader,
    RequestHeader, SetAclRequest, SetAclResponse, SetDataRequest, SetDataResponse, SyncRequest,
    WatcherEvent,
};
use zkwire_client::codec::{decode, encode, InputArchive, Record};
use zkwire_client::protocol::{build_frame, op, read_frame, xid, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
use zkwire_client::{Acl, ErrorCode, Stat};

/// Auth scheme the server always rejects.
pub const FAIL_SCHEME: &str = "fail";

const NODE_CREATED: i32 = 1;
const NODE_DELETED: i32 = 2;
const NODE_DATA_CHANGED: i32 = 3;
const NODE_CHILDREN_CHANGED: i32 = 4;
const SYNC_CONNECTED: i32 = 3;

struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
    stat: Stat,
    children: BTreeSet<String>,
}

struct Conn {
    session: i64,
    // Requests on a muted connection are read and never answered.
    muted: bool,
    tx: mpsc::UnboundedSender<Bytes>,
    // Dropping the entry ends the connection task.
    _alive: watch::Sender<()>,
}

#[derive(Clone, Copy)]
enum Kind {
    Data,
    Exist,
    Child,
}

#[derive(Default)]
struct Watches {
    data: HashMap<String, HashSet<u64>>,
    exist: HashMap<String, HashSet<u64>>,
    child: HashMap<String, HashSet<u64>>,
}

impl Watches {
    fn take(map: &mut HashMap<String, HashSet<u64>>, path: &str, into: &mut HashSet<u64>) {
        if let Some(conns) = map.remove(path) {
            into.extend(conns);
        }
    }

    fn forget(&mut self, conn: u64) {
        for map in [&mut self.data, &mut self.exist, &mut self.child] {
            map.retain(|_, conns| {
                conns.remove(&conn);
                !conns.is_empty()
            });
        }
    }

    fn count(&self) -> usize {
        [&self.data, &self.exist, &self.child]
            .iter()
            .map(|map| map.values().map(HashSet::len).sum::<usize>())
            .sum()
    }
}

struct State {
    zxid: i64,
    nodes: HashMap<String, Node>,
    sessions: HashMap<i64, Vec<u8>>,
    next_session: i64,
    next_conn: u64,
    conns: HashMap<u64, Conn>,
    watches: Watches,
    accepting: bool,
    stall_handshakes: bool,
    replace_sessions: bool,
    pings: usize,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn framed(header: &ReplyHeader, body: &[u8]) -> Bytes {
    let mut payload = encode(header).to_vec();
    payload.extend_from_slice(body);
    Bytes::from(build_frame(&payload).unwrap())
}

impl State {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                acl: zkwire_client::acl::OPEN_ACL_UNSAFE.clone(),
                stat: Stat::default(),
                children: BTreeSet::new(),
            },
        );
        Self {
            zxid: 0,
            nodes,
            sessions: HashMap::new(),
            next_session: 0x1000,
            next_conn: 1,
            conns: HashMap::new(),
            watches: Watches::default(),
            accepting: true,
            stall_handshakes: false,
            replace_sessions: false,
            pings: 0,
        }
    }

    fn send(&self, conn: u64, frame: Bytes) {
        if let Some(c) = self.conns.get(&conn) {
            let _ = c.tx.send(frame);
        }
    }

    fn reply(&self, conn: u64, xid: i32, err: i32, body: &[u8]) {
        let header = ReplyHeader {
            xid,
            zxid: self.zxid,
            err,
        };
        self.send(conn, framed(&header, body));
    }

    fn notify(&self, conns: HashSet<u64>, event_type: i32, path: &str) {
        let header = ReplyHeader {
            xid: xid::NOTIFICATION,
            zxid: -1,
            err: 0,
        };
        let event = encode(&WatcherEvent {
            event_type,
            state: SYNC_CONNECTED,
            path: path.to_string(),
        });
        for conn in conns {
            self.send(conn, framed(&header, &event));
        }
    }

    fn fire_created(&mut self, path: &str) {
        let mut conns = HashSet::new();
        Watches::take(&mut self.watches.exist, path, &mut conns);
        Watches::take(&mut self.watches.data, path, &mut conns);
        self.notify(conns, NODE_CREATED, path);
    }

    fn fire_deleted(&mut self, path: &str) {
        let mut conns = HashSet::new();
        Watches::take(&mut self.watches.data, path, &mut conns);
        Watches::take(&mut self.watches.exist, path, &mut conns);
        Watches::take(&mut self.watches.child, path, &mut conns);
        self.notify(conns, NODE_DELETED, path);
    }

    fn fire_data_changed(&mut self, path: &str) {
        let mut conns = HashSet::new();
        Watches::take(&mut self.watches.data, path, &mut conns);
        Watches::take(&mut self.watches.exist, path, &mut conns);
        self.notify(conns, NODE_DATA_CHANGED, path);
    }

    fn fire_children_changed(&mut self, path: &str) {
        let mut conns = HashSet::new();
        Watches::take(&mut self.watches.child, path, &mut conns);
        self.notify(conns, NODE_CHILDREN_CHANGED, path);
    }

    fn watch(&mut self, kind: Kind, path: &str, conn: u64) {
        let map = match kind {
            Kind::Data => &mut self.watches.data,
            Kind::Exist => &mut self.watches.exist,
            Kind::Child => &mut self.watches.child,
        };
        map.entry(path.to_string()).or_default().insert(conn);
    }

    // ---- tree operations ----

    fn create(&mut self, session: i64, req: CreateRequest) -> Result<String, ErrorCode> {
        let parent_path = parent_of(&req.path).to_string();
        let parent = self.nodes.get(&parent_path).ok_or(ErrorCode::NoNode)?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(ErrorCode::NoChildrenForEphemerals);
        }
        let mut path = req.path.clone();
        if req.flags & 2 != 0 {
            path.push_str(&format!("{:010}", parent.stat.cversion));
        }
        if self.nodes.contains_key(&path) {
            return Err(ErrorCode::NodeExists);
        }

        self.zxid += 1;
        let zxid = self.zxid;
        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            ctime: zxid,
            mtime: zxid,
            pzxid: zxid,
            ephemeral_owner: if req.flags & 1 != 0 { session } else { 0 },
            data_length: req.data.len() as i32,
            ..Stat::default()
        };
        self.nodes.insert(
            path.clone(),
            Node {
                data: req.data,
                acl: req.acl,
                stat,
                children: BTreeSet::new(),
            },
        );
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.insert(name_of(&path).to_string());
            parent.stat.cversion += 1;
            parent.stat.pzxid = zxid;
            parent.stat.num_children += 1;
        }
        self.fire_created(&path);
        self.fire_children_changed(&parent_path);
        Ok(path)
    }

    fn delete(&mut self, path: &str, version: i32) -> Result<(), ErrorCode> {
        if path == "/" {
            return Err(ErrorCode::BadArguments);
        }
        let node = self.nodes.get(path).ok_or(ErrorCode::NoNode)?;
        if version != -1 && version != node.stat.version {
            return Err(ErrorCode::BadVersion);
        }
        if !node.children.is_empty() {
            return Err(ErrorCode::NotEmpty);
        }

        self.zxid += 1;
        let zxid = self.zxid;
        self.nodes.remove(path);
        let parent_path = parent_of(path).to_string();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.remove(name_of(path));
            parent.stat.cversion += 1;
            parent.stat.pzxid = zxid;
            parent.stat.num_children -= 1;
        }
        self.fire_deleted(path);
        self.fire_children_changed(&parent_path);
        Ok(())
    }

    fn set_data(&mut self, req: SetDataRequest) -> Result<Stat, ErrorCode> {
        let node = self.nodes.get(&req.path).ok_or(ErrorCode::NoNode)?;
        if req.version != -1 && req.version != node.stat.version {
            return Err(ErrorCode::BadVersion);
        }
        self.zxid += 1;
        let zxid = self.zxid;
        let node = self.nodes.get_mut(&req.path).ok_or(ErrorCode::NoNode)?;
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = zxid;
        node.stat.data_length = req.data.len() as i32;
        node.data = req.data;
        let stat = node.stat.clone();
        self.fire_data_changed(&req.path);
        Ok(stat)
    }

    fn set_acl(&mut self, req: SetAclRequest) -> Result<Stat, ErrorCode> {
        let node = self.nodes.get_mut(&req.path).ok_or(ErrorCode::NoNode)?;
        if req.version != -1 && req.version != node.stat.aversion {
            return Err(ErrorCode::BadVersion);
        }
        node.stat.aversion += 1;
        node.acl = req.acl;
        Ok(node.stat.clone())
    }

    /// Drop a session and every ephemeral node it owns.
    fn end_session(&mut self, session: i64) {
        self.sessions.remove(&session);
        let mut owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == session)
            .map(|(path, _)| path.clone())
            .collect();
        owned.sort_by_key(|path| std::cmp::Reverse(path.len()));
        for path in owned {
            let _ = self.delete(&path, -1);
        }
    }

    fn apply(&mut self, conn: u64, session: i64, opcode: i32, input: &mut InputArchive) -> Result<Bytes, ErrorCode> {
        let bad = |_| ErrorCode::MarshallingError;
        match opcode {
            op::CREATE => {
                let req = CreateRequest::deserialize(input).map_err(bad)?;
                let path = self.create(session, req)?;
                Ok(encode(&CreateResponse { path }))
            }
            op::DELETE => {
                let req = DeleteRequest::deserialize(input).map_err(bad)?;
                self.delete(&req.path, req.version)?;
                Ok(Bytes::new())
            }
            op::EXISTS => {
                let req = ExistsRequest::deserialize(input).map_err(bad)?;
                match self.nodes.get(&req.path).map(|n| n.stat.clone()) {
                    Some(stat) => {
                        if req.watch {
                            self.watch(Kind::Data, &req.path, conn);
                        }
                        Ok(encode(&ExistsResponse { stat }))
                    }
                    None => {
                        if req.watch {
                            self.watch(Kind::Exist, &req.path, conn);
                        }
                        Err(ErrorCode::NoNode)
                    }
                }
            }
            op::GET_DATA => {
                let req = GetDataRequest::deserialize(input).map_err(bad)?;
                let node = self.nodes.get(&req.path).ok_or(ErrorCode::NoNode)?;
                let response = GetDataResponse {
                    data: node.data.clone(),
                    stat: node.stat.clone(),
                };
                if req.watch {
                    self.watch(Kind::Data, &req.path, conn);
                }
                Ok(encode(&response))
            }
            op::SET_DATA => {
                let req = SetDataRequest::deserialize(input).map_err(bad)?;
                let stat = self.set_data(req)?;
                Ok(encode(&SetDataResponse { stat }))
            }
            op::GET_CHILDREN | op::GET_CHILDREN2 => {
                let req = GetChildrenRequest::deserialize(input).map_err(bad)?;
                let node = self.nodes.get(&req.path).ok_or(ErrorCode::NoNode)?;
                let children: Vec<String> = node.children.iter().cloned().collect();
                let stat = node.stat.clone();
                if req.watch {
                    self.watch(Kind::Child, &req.path, conn);
                }
                if opcode == op::GET_CHILDREN {
                    Ok(encode(&GetChildrenResponse { children }))
                } else {
                    Ok(encode(&GetChildren2Response { children, stat }))
                }
            }
            op::GET_ACL => {
                let req = GetAclRequest::deserialize(input).map_err(bad)?;
                let node = self.nodes.get(&req.path).ok_or(ErrorCode::NoNode)?;
                Ok(encode(&GetAclResponse {
                    acl: node.acl.clone(),
                    stat: node.stat.clone(),
                }))
            }
            op::SET_ACL => {
                let req = SetAclRequest::deserialize(input).map_err(bad)?;
                let stat = self.set_acl(req)?;
                Ok(encode(&SetAclResponse { stat }))
            }
            op::SYNC => {
                let req = SyncRequest::deserialize(input).map_err(bad)?;
                Ok(encode(&req))
            }
            _ => Err(ErrorCode::Unimplemented),
        }
    }
}

enum Flow {
    Continue,
    Close,
}

fn handle(state: &Mutex<State>, conn: u64, payload: Bytes) -> Flow {
    let mut input = InputArchive::new(payload);
    let Ok(header) = RequestHeader::deserialize(&mut input) else {
        return Flow::Close;
    };
    let mut st = state.lock();
    let Some((session, muted)) = st.conns.get(&conn).map(|c| (c.session, c.muted)) else {
        return Flow::Close;
    };
    if header.op_type == op::PING {
        st.pings += 1;
    }
    if muted {
        return Flow::Continue;
    }

    match header.op_type {
        op::PING => {
            st.reply(conn, xid::PING, 0, &[]);
            Flow::Continue
        }
        op::AUTH => {
            let Ok(packet) = AuthPacket::deserialize(&mut input) else {
                return Flow::Close;
            };
            if packet.scheme == FAIL_SCHEME {
                st.reply(conn, xid::AUTH, ErrorCode::AuthFailed.code(), &[]);
                Flow::Close
            } else {
                st.reply(conn, xid::AUTH, 0, &[]);
                Flow::Continue
            }
        }
        op::CLOSE_SESSION => {
            st.end_session(session);
            st.reply(conn, header.xid, 0, &[]);
            Flow::Close
        }
        opcode => {
            match st.apply(conn, session, opcode, &mut input) {
                Ok(body) => st.reply(conn, header.xid, 0, &body),
                Err(code) => st.reply(conn, header.xid, code.code(), &[]),
            }
            Flow::Continue
        }
    }
}

async fn serve(state: Arc<Mutex<State>>, mut socket: TcpStream) {
    let Ok(frame) = read_frame(&mut socket, DEFAULT_MAX_FRAME_SIZE).await else {
        return;
    };
    let Ok(request) = decode::<ConnectRequest>(frame.into_payload()) else {
        return;
    };

    if state.lock().stall_handshakes {
        // Keep the socket open without ever answering.
        std::future::pending::<()>().await;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (alive, mut alive_rx) = watch::channel(());
    let (conn, response) = {
        let mut st = state.lock();
        let session = if request.session_id == 0 || st.replace_sessions {
            st.next_session += 1;
            let id = st.next_session;
            st.sessions.insert(id, id.to_be_bytes().repeat(2));
            Some(id)
        } else {
            match st.sessions.get(&request.session_id) {
                Some(password) if *password == request.passwd => Some(request.session_id),
                _ => None,
            }
        };

        match session {
            Some(id) => {
                let conn = st.next_conn;
                st.next_conn += 1;
                st.conns.insert(
                    conn,
                    Conn {
                        session: id,
                        muted: false,
                        tx,
                        _alive: alive,
                    },
                );
                let response = ConnectResponse {
                    protocol_version: 0,
                    time_out: request.time_out,
                    session_id: id,
                    passwd: st.sessions[&id].clone(),
                };
                (Some(conn), response)
            }
            None => {
                let response = ConnectResponse {
                    protocol_version: 0,
                    time_out: 0,
                    session_id: 0,
                    passwd: vec![0; 16],
                };
                (None, response)
            }
        }
    };

    let Ok(handshake) = build_frame(&encode(&response)) else {
        return;
    };
    if socket.write_all(&handshake).await.is_err() {
        if let Some(conn) = conn {
            state.lock().conns.remove(&conn);
        }
        return;
    }
    let Some(conn) = conn else {
        return;
    };

    let (mut reader, mut writer) = socket.into_split();
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 64 * 1024];

    'conn: loop {
        tokio::select! {
            _ = alive_rx.changed() => break,
            Some(out) = rx.recv() => {
                if writer.write_all(&out).await.is_err() {
                    break;
                }
            }
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let Ok(batch) = frames.push(&buf[..n]) else {
                    break;
                };
                for frame in batch {
                    if let Flow::Close = handle(&state, conn, frame.into_payload()) {
                        while let Ok(out) = rx.try_recv() {
                            let _ = writer.write_all(&out).await;
                        }
                        break 'conn;
                    }
                }
            }
        }
    }

    let mut st = state.lock();
    st.conns.remove(&conn);
    st.watches.forget(conn);
}

/// Handle to a running fake server. Dropping it stops the server.
pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    accept_task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::new()));

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                if !accept_state.lock().accepting {
                    drop(socket);
                    continue;
                }
                tokio::spawn(serve(accept_state.clone(), socket));
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// `host:port` of the server.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Connect string with an optional chroot suffix.
    pub fn connect_string(&self, chroot: &str) -> String {
        format!("{}{}", self.addr, chroot)
    }

    /// Close every live connection; sessions survive.
    pub fn drop_connections(&self) {
        let mut st = self.state.lock();
        let conns: Vec<u64> = st.conns.keys().copied().collect();
        for conn in conns {
            st.watches.forget(conn);
        }
        st.conns.clear();
    }

    /// Refuse (accept and immediately close) new connections.
    pub fn set_accepting(&self, accepting: bool) {
        self.state.lock().accepting = accepting;
    }

    /// Accept new connections but never answer their handshake.
    pub fn set_stall_handshakes(&self, stall: bool) {
        self.state.lock().stall_handshakes = stall;
    }

    /// Answer every later handshake with a fresh session, even a resume.
    pub fn set_replace_sessions(&self, replace: bool) {
        self.state.lock().replace_sessions = replace;
    }

    /// Stop answering anything, pings included, on the live connections.
    /// New connections are served normally.
    pub fn mute_connections(&self) {
        for conn in self.state.lock().conns.values_mut() {
            conn.muted = true;
        }
    }

    /// Pings received so far.
    pub fn ping_count(&self) -> usize {
        self.state.lock().pings
    }

    /// Expire a session: its ephemerals go, its connections close and a
    /// later handshake for it is refused.
    pub fn expire_session(&self, session: i64) {
        let mut st = self.state.lock();
        st.end_session(session);
        let conns: Vec<u64> = st
            .conns
            .iter()
            .filter(|(_, c)| c.session == session)
            .map(|(id, _)| *id)
            .collect();
        for conn in conns {
            st.watches.forget(conn);
            st.conns.remove(&conn);
        }
    }

    /// Change a node's data as another client would, firing watches.
    pub fn set_data(&self, path: &str, data: &[u8]) {
        let request = SetDataRequest {
            path: path.to_string(),
            data: data.to_vec(),
            version: -1,
        };
        self.state.lock().set_data(request).unwrap();
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().nodes.get(path).map(|n| n.data.clone())
    }

    pub fn children(&self, path: &str) -> Vec<String> {
        self.state
            .lock()
            .nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().conns.len()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn watch_count(&self) -> usize {
        self.state.lock().watches.count()
    }

    /// Wait until `predicate` holds on the server, polling.
    pub async fn wait_until(&self, what: &str, predicate: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !predicate(self) {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.state.lock().conns.clear();
    }
}
