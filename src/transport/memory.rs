//! In-process config service.
//!
//! `MemoryConfigServer` holds authoritative records and routes frames to the
//! streams opened through its `MemoryTransport`. It is what the integration
//! tests and the demo binary run against, so it can also misbehave on demand:
//! refuse dials, fail unary calls with a chosen status, break or end live
//! streams, require credentials.
//!
//! # Example
//! ```ignore
//! let server = MemoryConfigServer::new();
//! server.set_config(key.clone(), record);
//! let client = ConfigClient::connect(config, Arc::new(server.transport())).await?;
//! server.fail_next_dials(3);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::trace;

use crate::store::record::{ConfigRecord, SubscriptionKey};
use crate::transport::messages::RESULT_SUCCESS;
use crate::transport::{
    CallCredentials, CallMetadata, ConfigConnection, ConfigTransport, ConfigVersion,
    DeleteMessageResponse, DuplexStream, ListenStream, PublishConfigRequest,
    PublishConfigResponse, PutConfigRequest, PutConfigResponse, PutStream, Status,
    UpdateConfigMessage,
};

enum Event<T> {
    Item(T),
    Failed(Status),
    End,
}

/// Server side of one open stream.
struct StreamPeer<T> {
    key: Mutex<Option<SubscriptionKey>>,
    tx: mpsc::UnboundedSender<Event<T>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Event<T>>>,
    closed: AtomicBool,
    failure: Mutex<Option<Status>>,
    frames: AtomicU32,
    heartbeats: AtomicU32,
}

impl<T> StreamPeer<T> {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            key: Mutex::new(None),
            tx,
            rx: AsyncMutex::new(rx),
            closed: AtomicBool::new(false),
            failure: Mutex::new(None),
            frames: AtomicU32::new(0),
            heartbeats: AtomicU32::new(0),
        })
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn subscribed_to(&self, key: &SubscriptionKey) -> bool {
        self.is_live() && self.key.lock().as_ref() == Some(key)
    }

    fn push(&self, item: T) {
        if self.is_live() {
            let _ = self.tx.send(Event::Item(item));
        }
    }

    fn fail(&self, status: Status) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.failure.lock() = Some(status.clone());
            let _ = self.tx.send(Event::Failed(status));
        }
    }

    fn end(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.failure.lock() = Some(Status::canceled("stream ended by server"));
            let _ = self.tx.send(Event::End);
        }
    }

    fn closed_status(&self) -> Status {
        self.failure
            .lock()
            .clone()
            .unwrap_or_else(|| Status::canceled("stream closed"))
    }

    fn check_open(&self) -> Result<(), Status> {
        if self.is_live() {
            Ok(())
        } else {
            Err(self.closed_status())
        }
    }

    async fn recv(&self) -> Result<Option<T>, Status> {
        let mut rx = self.rx.lock().await;
        let event = if self.is_live() {
            rx.recv().await
        } else {
            rx.try_recv().ok()
        };
        match event {
            Some(Event::Item(item)) => Ok(Some(item)),
            Some(Event::Failed(status)) => Err(status),
            Some(Event::End) => Ok(None),
            None => Err(self.closed_status()),
        }
    }
}

#[derive(Default)]
struct ServerState {
    configs: Mutex<HashMap<SubscriptionKey, ConfigRecord>>,
    listen_peers: Mutex<Vec<Arc<StreamPeer<ConfigRecord>>>>,
    put_peers: Mutex<Vec<Arc<StreamPeer<PutConfigResponse>>>>,
    acks: Mutex<Vec<UpdateConfigMessage>>,
    metadata: Mutex<Vec<CallMetadata>>,
    unary_failures: Mutex<VecDeque<Status>>,
    publish_result: Mutex<Option<String>>,
    dials: AtomicU32,
    failing_dials: AtomicU32,
    down: AtomicBool,
    require_credentials: AtomicBool,
    stall_acks: AtomicBool,
    stalled_acks: AtomicU32,
    next_message: AtomicU64,
    next_version: AtomicU64,
}

impl ServerState {
    fn live_listeners(&self, key: &SubscriptionKey) -> Vec<Arc<StreamPeer<ConfigRecord>>> {
        self.listen_peers
            .lock()
            .iter()
            .filter(|p| p.subscribed_to(key))
            .cloned()
            .collect()
    }

    fn live_putters(&self, key: &SubscriptionKey) -> Vec<Arc<StreamPeer<PutConfigResponse>>> {
        self.put_peers
            .lock()
            .iter()
            .filter(|p| p.subscribed_to(key))
            .cloned()
            .collect()
    }

    fn fail_all(&self, status: &Status) {
        for peer in self.listen_peers.lock().drain(..) {
            peer.fail(status.clone());
        }
        for peer in self.put_peers.lock().drain(..) {
            peer.fail(status.clone());
        }
    }

    fn check_up(&self) -> Result<(), Status> {
        if self.down.load(Ordering::SeqCst) {
            Err(Status::unavailable("config service is down"))
        } else {
            Ok(())
        }
    }

    async fn authorize(&self, credentials: &dyn CallCredentials) -> Result<(), Status> {
        let metadata = credentials.metadata().await;
        let authorized = metadata.get("token").is_some_and(|t| !t.is_empty());
        self.metadata.lock().push(metadata);
        if self.require_credentials.load(Ordering::SeqCst) && !authorized {
            return Err(Status::unauthenticated("missing backend token"));
        }
        Ok(())
    }

    /// What a client holding `held` versions has not seen yet.
    fn delta_since(&self, key: &SubscriptionKey, held: &ConfigVersion) -> Option<ConfigRecord> {
        let configs = self.configs.lock();
        let current = configs.get(key)?;
        let mut delta = ConfigRecord::default();
        if current.version != held.version {
            delta.private = current.private.clone();
            delta.version = current.version.clone();
            delta.format = current.format;
        }
        if current.public_version != held.public_version {
            delta.public = current.public.clone();
            delta.public_version = current.public_version.clone();
            delta.public_format = current.public_format;
            delta.services = current.services.clone();
        }
        Some(delta)
    }
}

/// In-process config service with failure injection.
#[derive(Clone, Default)]
pub struct MemoryConfigServer {
    state: Arc<ServerState>,
}

impl MemoryConfigServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose connections are served by this server.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            state: Arc::clone(&self.state),
        }
    }

    /// Replace the record for `key` and push it to every listener of the key.
    pub fn set_config(&self, key: SubscriptionKey, record: ConfigRecord) {
        self.state.configs.lock().insert(key.clone(), record.clone());
        for peer in self.state.live_listeners(&key) {
            peer.push(record.clone());
        }
    }

    pub fn config(&self, key: &SubscriptionKey) -> Option<ConfigRecord> {
        self.state.configs.lock().get(key).cloned()
    }

    pub fn remove_config(&self, key: &SubscriptionKey) {
        self.state.configs.lock().remove(key);
    }

    /// Replace the record for `key` and notify write-back streams, which must
    /// acknowledge the returned message.
    pub fn push_update(&self, key: SubscriptionKey, record: ConfigRecord) -> UpdateConfigMessage {
        self.state.configs.lock().insert(key.clone(), record.clone());
        let id = self.state.next_message.fetch_add(1, Ordering::SeqCst);
        let message = UpdateConfigMessage {
            key: format!("update-{id}"),
            value: key.to_string(),
        };
        for peer in self.state.live_putters(&key) {
            peer.push(PutConfigResponse {
                message: message.clone(),
                config: record.clone(),
            });
        }
        message
    }

    /// Messages acknowledged through `delete_message`, in arrival order.
    pub fn acks(&self) -> Vec<UpdateConfigMessage> {
        self.state.acks.lock().clone()
    }

    /// Leave every later `delete_message` call unanswered.
    pub fn stall_acks(&self, stall: bool) {
        self.state.stall_acks.store(stall, Ordering::SeqCst);
    }

    /// `delete_message` calls currently left unanswered.
    pub fn stalled_acks(&self) -> u32 {
        self.state.stalled_acks.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` dials with `Unavailable`.
    pub fn fail_next_dials(&self, n: u32) {
        self.state.failing_dials.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` unary calls with `status`.
    pub fn fail_next_calls(&self, status: Status, n: usize) {
        let mut failures = self.state.unary_failures.lock();
        for _ in 0..n {
            failures.push_back(status.clone());
        }
    }

    /// Answer publishes with `result` instead of success.
    pub fn set_publish_result(&self, result: Option<String>) {
        *self.state.publish_result.lock() = result;
    }

    /// Take the service down (dials, calls and live streams fail with `Unavailable`) or back up.
    pub fn set_down(&self, down: bool) {
        self.state.down.store(down, Ordering::SeqCst);
        if down {
            self.state.fail_all(&Status::unavailable("config service is down"));
        }
    }

    /// Fail every live stream with `status`.
    pub fn break_streams(&self, status: Status) {
        self.state.fail_all(&status);
    }

    /// End every live stream cleanly.
    pub fn end_streams(&self) {
        for peer in self.state.listen_peers.lock().drain(..) {
            peer.end();
        }
        for peer in self.state.put_peers.lock().drain(..) {
            peer.end();
        }
    }

    pub fn require_credentials(&self, required: bool) {
        self.state.require_credentials.store(required, Ordering::SeqCst);
    }

    /// Metadata attached to every call seen so far.
    pub fn seen_metadata(&self) -> Vec<CallMetadata> {
        self.state.metadata.lock().clone()
    }

    pub fn dial_count(&self) -> u32 {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn live_listen_streams(&self) -> usize {
        self.state.listen_peers.lock().iter().filter(|p| p.is_live()).count()
    }

    pub fn live_put_streams(&self) -> usize {
        self.state.put_peers.lock().iter().filter(|p| p.is_live()).count()
    }

    /// Live listen streams subscribed to `key`.
    pub fn listeners(&self, key: &SubscriptionKey) -> usize {
        self.state.live_listeners(key).len()
    }

    /// Live write-back streams registered for `key`.
    pub fn put_registrations(&self, key: &SubscriptionKey) -> usize {
        self.state.live_putters(key).len()
    }

    /// Heartbeat frames received on write-back streams for `key`.
    pub fn put_heartbeats(&self, key: &SubscriptionKey) -> u32 {
        self.state
            .put_peers
            .lock()
            .iter()
            .filter(|p| p.key.lock().as_ref() == Some(key))
            .map(|p| p.heartbeats.load(Ordering::SeqCst))
            .sum()
    }

    /// Subscribe/heartbeat frames received on listen streams for `key`.
    pub fn listen_frames(&self, key: &SubscriptionKey) -> u32 {
        self.state
            .listen_peers
            .lock()
            .iter()
            .filter(|p| p.key.lock().as_ref() == Some(key))
            .map(|p| p.frames.load(Ordering::SeqCst))
            .sum()
    }
}

/// Dials connections served by a `MemoryConfigServer`.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<ServerState>,
}

#[async_trait]
impl ConfigTransport for MemoryTransport {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: Arc<dyn CallCredentials>,
    ) -> Result<Arc<dyn ConfigConnection>, Status> {
        let attempt = self.state.dials.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(endpoint = %endpoint, attempt, "Dialing in-memory config service");

        let refused = self
            .state
            .failing_dials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Status::unavailable("connection refused"));
        }
        self.state.check_up()?;

        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            credentials,
            closed: AtomicBool::new(false),
            listen_peers: Mutex::new(Vec::new()),
            put_peers: Mutex::new(Vec::new()),
        }))
    }
}

/// Add `peer`, dropping peers closed since the last call.
fn track<T>(peers: &Mutex<Vec<Arc<StreamPeer<T>>>>, peer: &Arc<StreamPeer<T>>) {
    let mut peers = peers.lock();
    peers.retain(|p| p.is_live());
    peers.push(Arc::clone(peer));
}

/// Counts an unanswered acknowledgement until its call is dropped.
struct StalledAck<'a>(&'a ServerState);

impl Drop for StalledAck<'_> {
    fn drop(&mut self) {
        self.0.stalled_acks.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemoryConnection {
    state: Arc<ServerState>,
    credentials: Arc<dyn CallCredentials>,
    closed: AtomicBool,
    listen_peers: Mutex<Vec<Arc<StreamPeer<ConfigRecord>>>>,
    put_peers: Mutex<Vec<Arc<StreamPeer<PutConfigResponse>>>>,
}

impl MemoryConnection {
    async fn admit(&self) -> Result<(), Status> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Status::unavailable("connection closed"));
        }
        self.state.check_up()?;
        self.state.authorize(self.credentials.as_ref()).await
    }

    async fn admit_unary(&self) -> Result<(), Status> {
        self.admit().await?;
        match self.state.unary_failures.lock().pop_front() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ConfigConnection for MemoryConnection {
    async fn get_config(&self, request: ConfigVersion) -> Result<ConfigRecord, Status> {
        self.admit_unary().await?;
        let key = request.key();
        self.state
            .configs
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("config {key} does not exist")))
    }

    async fn publish_config(
        &self,
        request: PublishConfigRequest,
    ) -> Result<PublishConfigResponse, Status> {
        self.admit_unary().await?;
        if let Some(result) = self.state.publish_result.lock().clone() {
            return Ok(PublishConfigResponse { result });
        }

        let key = SubscriptionKey::new(request.group, request.name);
        let version = format!(
            "pub-{}",
            self.state.next_version.fetch_add(1, Ordering::SeqCst) + 1
        );
        let delta = ConfigRecord {
            private: request.body,
            version,
            format: request.format,
            ..Default::default()
        };
        {
            let mut configs = self.state.configs.lock();
            let record = configs.entry(key.clone()).or_default();
            record.private = delta.private.clone();
            record.version = delta.version.clone();
            record.format = delta.format;
        }
        for peer in self.state.live_listeners(&key) {
            peer.push(delta.clone());
        }
        Ok(PublishConfigResponse {
            result: RESULT_SUCCESS.to_string(),
        })
    }

    async fn delete_message(
        &self,
        request: UpdateConfigMessage,
    ) -> Result<DeleteMessageResponse, Status> {
        self.admit_unary().await?;
        if self.state.stall_acks.load(Ordering::SeqCst) {
            self.state.stalled_acks.fetch_add(1, Ordering::SeqCst);
            let _stalled = StalledAck(&self.state);
            std::future::pending::<()>().await;
        }
        self.state.acks.lock().push(request);
        Ok(DeleteMessageResponse {
            result: RESULT_SUCCESS.to_string(),
        })
    }

    async fn open_listen(&self) -> Result<ListenStream, Status> {
        self.admit().await?;
        let peer = StreamPeer::new();
        track(&self.state.listen_peers, &peer);
        track(&self.listen_peers, &peer);
        Ok(Arc::new(MemoryListenStream {
            peer,
            state: Arc::clone(&self.state),
        }))
    }

    async fn open_put(&self) -> Result<PutStream, Status> {
        self.admit().await?;
        let peer = StreamPeer::new();
        track(&self.state.put_peers, &peer);
        track(&self.put_peers, &peer);
        Ok(Arc::new(MemoryPutStream { peer }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for peer in self.listen_peers.lock().drain(..) {
            peer.fail(Status::canceled("connection closed"));
        }
        for peer in self.put_peers.lock().drain(..) {
            peer.fail(Status::canceled("connection closed"));
        }
        self.state.listen_peers.lock().retain(|p| p.is_live());
        self.state.put_peers.lock().retain(|p| p.is_live());
    }
}

struct MemoryListenStream {
    peer: Arc<StreamPeer<ConfigRecord>>,
    state: Arc<ServerState>,
}

#[async_trait]
impl DuplexStream<ConfigVersion, ConfigRecord> for MemoryListenStream {
    async fn send(&self, frame: ConfigVersion) -> Result<(), Status> {
        self.peer.check_open()?;
        self.peer.frames.fetch_add(1, Ordering::SeqCst);
        let key = frame.key();
        *self.peer.key.lock() = Some(key.clone());

        match self.state.delta_since(&key, &frame) {
            None => self
                .peer
                .fail(Status::not_found(format!("config {key} does not exist"))),
            Some(delta) if !delta.is_empty() => self.peer.push(delta),
            Some(_) => {}
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<ConfigRecord>, Status> {
        self.peer.recv().await
    }

    async fn close(&self) {
        self.peer.fail(Status::canceled("stream closed by client"));
    }
}

struct MemoryPutStream {
    peer: Arc<StreamPeer<PutConfigResponse>>,
}

#[async_trait]
impl DuplexStream<PutConfigRequest, PutConfigResponse> for MemoryPutStream {
    async fn send(&self, frame: PutConfigRequest) -> Result<(), Status> {
        self.peer.check_open()?;
        self.peer.frames.fetch_add(1, Ordering::SeqCst);
        if frame.is_heartbeat() {
            self.peer.heartbeats.fetch_add(1, Ordering::SeqCst);
        }
        *self.peer.key.lock() = Some(frame.key());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<PutConfigResponse>, Status> {
        self.peer.recv().await
    }

    async fn close(&self) {
        self.peer.fail(Status::canceled("stream closed by client"));
    }
}
