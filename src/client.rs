//! Client builder and public operations.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the
//! connection. The [`Client`] is a cheap, cloneable handle:
//! 1. `build()` spawns the connection manager task
//! 2. operations queue requests on the shared pipeline
//! 3. replies come back through a `oneshot` or a callback
//! 4. `close()` (or dropping the last handle) ends the session
//!
//! # Example
//!
//! ```ignore
//! use zkwire_client::{acl, Client, CreateMode};
//!
//! #[tokio::main]
//! async fn main() -> zkwire_client::Result<()> {
//!     let client = Client::builder("127.0.0.1:2181/app")
//!         .session_timeout(std::time::Duration::from_secs(10))
//!         .connect()
//!         .await?;
//!
//!     client.create("/config", b"v1", &acl::OPEN_ACL_UNSAFE, CreateMode::Persistent).await?;
//!     let (data, stat) = client.get_data("/config", None).await?;
//!     println!("{:?} at version {}", data, stat.version);
//!
//!     client.close().await
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::acl::Acl;
use crate::codec::records::{
    AuthPacket, CreateRequest, DeleteRequest, ExistsRequest, GetAclRequest, GetChildrenRequest,
    GetDataRequest, SetAclRequest, SetDataRequest, Stat, SyncRequest,
};
use crate::config::ClientConfig;
use crate::error::{ErrorCode, Result, ZkError};
use crate::ops::{Op, Response};
use crate::path::{prepend_chroot, strip_chroot, validate_path};
use crate::pipeline::{Completion, WatchRegistration, WatchTarget};
use crate::session::shared::Shared;
use crate::session::{manager, ConnectString, HostProvider, Session, SessionState};
use crate::watch::{WatchKind, Watcher};

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    Persistent,
    /// Deleted when the creating session ends.
    Ephemeral,
    /// The server appends a 10-digit, monotonically increasing suffix.
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    /// Wire flags.
    pub fn flags(&self) -> i32 {
        match self {
            Self::Persistent => 0,
            Self::Ephemeral => 1,
            Self::PersistentSequential => 2,
            Self::EphemeralSequential => 3,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    default_watcher: Option<Arc<dyn Watcher>>,
    session: Option<(i64, Vec<u8>)>,
    auth: Vec<AuthPacket>,
}

impl ClientBuilder {
    /// Create a builder for `host:port[,host:port...][/chroot]`.
    pub fn new(connect_string: impl Into<String>) -> Self {
        Self::from_config(ClientConfig {
            connect_string: connect_string.into(),
            ..ClientConfig::default()
        })
    }

    /// Start from a full configuration (for example one loaded from JSON).
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            default_watcher: None,
            session: None,
            auth: Vec::new(),
        }
    }

    /// Requested session timeout.
    ///
    /// Default: 30 seconds
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Largest inbound frame accepted.
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.backpressure_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Requests allowed to wait for sending before submits fail with
    /// `Backpressure`.
    ///
    /// Default: 4096
    pub fn max_queued_requests(mut self, limit: usize) -> Self {
        self.config.max_queued_requests = limit;
        self
    }

    /// Reconnect backoff bounds.
    ///
    /// Default: 100ms doubling up to 10 seconds
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_backoff_ms = initial.as_millis() as u64;
        self.config.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Limit for one TCP connect plus handshake.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Receives session events (`SyncConnected`, `Disconnected`, `Expired`,
    /// `Closed`, `AuthFailed`).
    pub fn default_watcher(mut self, watcher: Arc<dyn Watcher>) -> Self {
        self.default_watcher = Some(watcher);
        self
    }

    /// Resume an existing session instead of creating a new one.
    pub fn session(mut self, id: i64, password: Vec<u8>) -> Self {
        self.session = Some((id, password));
        self
    }

    /// Credentials sent on every connection.
    pub fn auth(mut self, scheme: impl Into<String>, auth: impl Into<Vec<u8>>) -> Self {
        self.auth.push(AuthPacket {
            auth_type: 0,
            scheme: scheme.into(),
            auth: auth.into(),
        });
        self
    }

    /// Spawn the connection manager and return at once.
    ///
    /// Must be called inside a tokio runtime. Requests issued before the
    /// first connection are queued.
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        let connect = ConnectString::parse(&self.config.connect_string)?;

        let (id, password) = self.session.unwrap_or_default();
        let session = Session {
            id,
            password,
            timeout: self.config.session_timeout(),
            last_zxid: 0,
        };

        let shared = Arc::new(Shared::new(
            self.config,
            connect.chroot,
            session,
            self.auth,
            self.default_watcher,
        ));
        let manager = tokio::spawn(manager::run(shared.clone(), HostProvider::new(connect.hosts)));

        Ok(Client {
            inner: Arc::new(ClientInner {
                shared,
                manager: Mutex::new(Some(manager)),
            }),
        })
    }

    /// Build and wait for the first connection.
    ///
    /// Fails with `Timeout` if no server accepts a session within the
    /// requested session timeout.
    pub async fn connect(self) -> Result<Client> {
        let wait = self.config.session_timeout();
        let client = self.build()?;
        let outcome = match tokio::time::timeout(wait, client.wait_until_connected()).await {
            Ok(result) => result,
            Err(_) => Err(ZkError::Timeout),
        };
        match outcome {
            Ok(()) => Ok(client),
            Err(e) => {
                client.close().await.ok();
                Err(e)
            }
        }
    }
}

struct ClientInner {
    shared: Arc<Shared>,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // The manager task outlives the handle long enough to say goodbye.
        self.shared.request_close();
    }
}

/// Handle to one session. Clones share the session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

type Mapper<T> = fn(Result<Response>) -> Result<T>;

impl Client {
    /// Create a new client builder.
    pub fn builder(connect_string: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(connect_string)
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    fn server_path(&self, path: &str, sequential: bool) -> Result<String> {
        validate_path(path, sequential)?;
        Ok(prepend_chroot(self.shared().chroot(), path))
    }

    fn watch_for(
        &self,
        path: &str,
        target: WatchTarget,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> Option<WatchRegistration> {
        watcher.map(|watcher| WatchRegistration {
            path: path.to_string(),
            target,
            watcher,
        })
    }

    async fn request<T>(
        &self,
        op: Result<Op>,
        watch: Option<WatchRegistration>,
        map: Mapper<T>,
    ) -> Result<T> {
        let op = op?;
        let (tx, rx) = oneshot::channel();
        self.shared().submit(op, Completion::Waiter(tx), watch);
        let result = rx.await.map_err(|_| ZkError::ConnectionClosed)?;
        map(result)
    }

    fn request_with_callback<T, F>(
        &self,
        op: Result<Op>,
        watch: Option<WatchRegistration>,
        map: impl FnOnce(Result<Response>) -> Result<T> + Send + 'static,
        callback: F,
    ) where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        match op {
            Ok(op) => self.shared().submit(
                op,
                Completion::Callback(Box::new(move |result| callback(map(result)))),
                watch,
            ),
            Err(e) => callback(Err(e)),
        }
    }

    // ---- request construction ----

    fn create_op(&self, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode) -> Result<Op> {
        if acl.is_empty() {
            return Err(ZkError::BadArguments("ACL must not be empty".into()));
        }
        Ok(Op::Create(CreateRequest {
            path: self.server_path(path, mode.is_sequential())?,
            data: data.to_vec(),
            acl: acl.to_vec(),
            flags: mode.flags(),
        }))
    }

    fn delete_op(&self, path: &str, version: Option<i32>) -> Result<Op> {
        Ok(Op::Delete(DeleteRequest {
            path: self.server_path(path, false)?,
            version: version.unwrap_or(-1),
        }))
    }

    fn exists_op(&self, path: &str, watch: bool) -> Result<Op> {
        Ok(Op::Exists(ExistsRequest {
            path: self.server_path(path, false)?,
            watch,
        }))
    }

    fn get_data_op(&self, path: &str, watch: bool) -> Result<Op> {
        Ok(Op::GetData(GetDataRequest {
            path: self.server_path(path, false)?,
            watch,
        }))
    }

    fn set_data_op(&self, path: &str, data: &[u8], version: Option<i32>) -> Result<Op> {
        Ok(Op::SetData(SetDataRequest {
            path: self.server_path(path, false)?,
            data: data.to_vec(),
            version: version.unwrap_or(-1),
        }))
    }

    fn get_children_op(&self, path: &str, watch: bool, with_stat: bool) -> Result<Op> {
        let request = GetChildrenRequest {
            path: self.server_path(path, false)?,
            watch,
        };
        Ok(if with_stat {
            Op::GetChildren2(request)
        } else {
            Op::GetChildren(request)
        })
    }

    fn get_acl_op(&self, path: &str) -> Result<Op> {
        Ok(Op::GetAcl(GetAclRequest {
            path: self.server_path(path, false)?,
        }))
    }

    fn set_acl_op(&self, path: &str, acl: &[Acl], version: Option<i32>) -> Result<Op> {
        if acl.is_empty() {
            return Err(ZkError::BadArguments("ACL must not be empty".into()));
        }
        Ok(Op::SetAcl(SetAclRequest {
            path: self.server_path(path, false)?,
            acl: acl.to_vec(),
            version: version.unwrap_or(-1),
        }))
    }

    fn sync_op(&self, path: &str) -> Result<Op> {
        Ok(Op::Sync(SyncRequest {
            path: self.server_path(path, false)?,
        }))
    }

    fn strip_mapper(&self) -> impl FnOnce(Result<Response>) -> Result<String> + Send + 'static {
        let chroot = self.shared().chroot().map(str::to_string);
        move |result| Ok(strip_chroot(chroot.as_deref(), &result?.into_path()?))
    }

    // ---- operations ----

    /// Create a node and return its actual path (with the sequence suffix
    /// for sequential modes).
    pub async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String> {
        let created = self
            .request(self.create_op(path, data, acl, mode), None, |r| r?.into_path())
            .await?;
        Ok(strip_chroot(self.shared().chroot(), &created))
    }

    pub fn create_with_callback<F>(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
        callback: F,
    ) where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        let map = self.strip_mapper();
        self.request_with_callback(self.create_op(path, data, acl, mode), None, map, callback);
    }

    /// Delete a node. `None` matches any version.
    pub async fn delete(&self, path: &str, version: Option<i32>) -> Result<()> {
        self.request(self.delete_op(path, version), None, |r| r?.into_empty())
            .await
    }

    pub fn delete_with_callback<F>(&self, path: &str, version: Option<i32>, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.request_with_callback(
            self.delete_op(path, version),
            None,
            |r: Result<Response>| r?.into_empty(),
            callback,
        );
    }

    /// Stat of a node, or `None` if it does not exist. A watcher is armed
    /// either way: it fires on creation, deletion or data change.
    pub async fn exists(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> Result<Option<Stat>> {
        let watch = self.watch_for(path, WatchTarget::Exists, watcher);
        let op = self.exists_op(path, watch.is_some());
        self.request(op, watch, map_exists).await
    }

    pub fn exists_with_callback<F>(&self, path: &str, watcher: Option<Arc<dyn Watcher>>, callback: F)
    where
        F: FnOnce(Result<Option<Stat>>) + Send + 'static,
    {
        let watch = self.watch_for(path, WatchTarget::Exists, watcher);
        let op = self.exists_op(path, watch.is_some());
        self.request_with_callback(op, watch, map_exists, callback);
    }

    /// Data and stat of a node. A watcher fires on data change or deletion.
    pub async fn get_data(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> Result<(Vec<u8>, Stat)> {
        let watch = self.watch_for(path, WatchTarget::Data, watcher);
        let op = self.get_data_op(path, watch.is_some());
        self.request(op, watch, |r| r?.into_data()).await
    }

    pub fn get_data_with_callback<F>(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
        callback: F,
    ) where
        F: FnOnce(Result<(Vec<u8>, Stat)>) + Send + 'static,
    {
        let watch = self.watch_for(path, WatchTarget::Data, watcher);
        let op = self.get_data_op(path, watch.is_some());
        self.request_with_callback(op, watch, |r: Result<Response>| r?.into_data(), callback);
    }

    /// Replace a node's data. `None` matches any version.
    pub async fn set_data(&self, path: &str, data: &[u8], version: Option<i32>) -> Result<Stat> {
        self.request(self.set_data_op(path, data, version), None, |r| r?.into_stat())
            .await
    }

    pub fn set_data_with_callback<F>(
        &self,
        path: &str,
        data: &[u8],
        version: Option<i32>,
        callback: F,
    ) where
        F: FnOnce(Result<Stat>) + Send + 'static,
    {
        self.request_with_callback(
            self.set_data_op(path, data, version),
            None,
            |r: Result<Response>| r?.into_stat(),
            callback,
        );
    }

    /// Names of a node's children. A watcher fires on child changes or
    /// deletion of the node.
    pub async fn get_children(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> Result<Vec<String>> {
        let watch = self.watch_for(path, WatchTarget::Child, watcher);
        let op = self.get_children_op(path, watch.is_some(), false);
        self.request(op, watch, |r| r?.into_children()).await
    }

    pub fn get_children_with_callback<F>(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
        callback: F,
    ) where
        F: FnOnce(Result<Vec<String>>) + Send + 'static,
    {
        let watch = self.watch_for(path, WatchTarget::Child, watcher);
        let op = self.get_children_op(path, watch.is_some(), false);
        self.request_with_callback(op, watch, |r: Result<Response>| r?.into_children(), callback);
    }

    /// Like [`get_children`](Self::get_children), plus the parent's stat.
    pub async fn get_children2(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
    ) -> Result<(Vec<String>, Stat)> {
        let watch = self.watch_for(path, WatchTarget::Child, watcher);
        let op = self.get_children_op(path, watch.is_some(), true);
        self.request(op, watch, |r| r?.into_children2()).await
    }

    pub fn get_children2_with_callback<F>(
        &self,
        path: &str,
        watcher: Option<Arc<dyn Watcher>>,
        callback: F,
    ) where
        F: FnOnce(Result<(Vec<String>, Stat)>) + Send + 'static,
    {
        let watch = self.watch_for(path, WatchTarget::Child, watcher);
        let op = self.get_children_op(path, watch.is_some(), true);
        self.request_with_callback(op, watch, |r: Result<Response>| r?.into_children2(), callback);
    }

    pub async fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, Stat)> {
        self.request(self.get_acl_op(path), None, |r| r?.into_acl()).await
    }

    pub fn get_acl_with_callback<F>(&self, path: &str, callback: F)
    where
        F: FnOnce(Result<(Vec<Acl>, Stat)>) + Send + 'static,
    {
        self.request_with_callback(
            self.get_acl_op(path),
            None,
            |r: Result<Response>| r?.into_acl(),
            callback,
        );
    }

    /// Replace a node's ACL. `None` matches any ACL version.
    pub async fn set_acl(&self, path: &str, acl: &[Acl], version: Option<i32>) -> Result<Stat> {
        self.request(self.set_acl_op(path, acl, version), None, |r| r?.into_stat())
            .await
    }

    pub fn set_acl_with_callback<F>(
        &self,
        path: &str,
        acl: &[Acl],
        version: Option<i32>,
        callback: F,
    ) where
        F: FnOnce(Result<Stat>) + Send + 'static,
    {
        self.request_with_callback(
            self.set_acl_op(path, acl, version),
            None,
            |r: Result<Response>| r?.into_stat(),
            callback,
        );
    }

    /// Wait until the connected server has caught up with the leader.
    pub async fn sync(&self, path: &str) -> Result<String> {
        let synced = self.request(self.sync_op(path), None, |r| r?.into_path()).await?;
        Ok(strip_chroot(self.shared().chroot(), &synced))
    }

    pub fn sync_with_callback<F>(&self, path: &str, callback: F)
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        let map = self.strip_mapper();
        self.request_with_callback(self.sync_op(path), None, map, callback);
    }

    /// Add credentials to the session. They are replayed after every
    /// reconnect. A rejection moves the session to `AuthFailed`.
    pub fn add_auth(&self, scheme: &str, auth: &[u8]) -> Result<()> {
        self.shared().add_auth(AuthPacket {
            auth_type: 0,
            scheme: scheme.to_string(),
            auth: auth.to_vec(),
        })
    }

    /// Drop a subscription locally. Returns `true` if it was present.
    pub fn remove_watch(&self, path: &str, kind: WatchKind, watcher: &Arc<dyn Watcher>) -> bool {
        self.shared().watches.lock().remove(path, kind, watcher)
    }

    /// Run `request` with a deadline, failing with `Timeout`. A reply that
    /// arrives afterwards is discarded.
    pub async fn with_timeout<T, F>(timeout: Duration, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ZkError::Timeout)?
    }

    // ---- session ----

    pub fn state(&self) -> SessionState {
        self.shared().state()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared().subscribe_state()
    }

    /// Wait until connected, or fail if the session reached a terminal state.
    pub async fn wait_until_connected(&self) -> Result<()> {
        let mut rx = self.state_changes();
        let state = *rx
            .wait_for(|s| s.is_connected() || s.is_terminal())
            .await
            .map_err(|_| ZkError::ConnectionClosed)?;
        match state {
            SessionState::Connected => Ok(()),
            SessionState::Expired => Err(ZkError::SessionExpired),
            SessionState::AuthFailed => Err(ZkError::AuthFailed),
            _ => Err(ZkError::ConnectionClosed),
        }
    }

    /// Server-assigned session id (0 before the first connection).
    pub fn session_id(&self) -> i64 {
        self.shared().session().id
    }

    pub fn session_password(&self) -> Vec<u8> {
        self.shared().session().password
    }

    /// Negotiated session timeout.
    pub fn session_timeout(&self) -> Duration {
        self.shared().session().timeout
    }

    pub fn chroot(&self) -> Option<&str> {
        self.shared().chroot()
    }

    /// Close the session: pending requests fail with `ConnectionClosed`,
    /// ephemeral nodes are removed by the server.
    pub async fn close(&self) -> Result<()> {
        self.shared().request_close();
        let manager = self.inner.manager.lock().take();
        match manager {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::warn!("Connection task ended abnormally: {}", e);
                }
            }
            None => {
                let mut rx = self.state_changes();
                let _ = rx.wait_for(|s| s.is_terminal()).await;
            }
        }
        Ok(())
    }
}

fn map_exists(result: Result<Response>) -> Result<Option<Stat>> {
    match result {
        Ok(response) => response.into_stat().map(Some),
        Err(ZkError::Operation(ErrorCode::NoNode)) => Ok(None),
        Err(e) => Err(e),
    }
}
