//! Connection Manager: owns the transport link and every stream handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::observability::metrics;
use crate::resilience::ReconnectBackoff;
use crate::store::record::SubscriptionId;
use crate::transport::{
    CallCredentials, ConfigConnection, ConfigTransport, ListenStream, PutStream, Status,
};

/// The two duplex streams of one subscription, opened on one link.
#[derive(Clone)]
pub struct StreamHandleSet {
    pub generation: u64,
    pub listen: ListenStream,
    pub put: PutStream,
}

impl StreamHandleSet {
    async fn close(&self) {
        self.listen.close().await;
        self.put.close().await;
    }
}

/// Dial attempts and pre-jitter sleeps of the last completed reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectReport {
    pub attempts: u32,
    pub delays: Vec<Duration>,
}

struct Link {
    generation: u64,
    conn: Option<Arc<dyn ConfigConnection>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkState {
    generation: u64,
    connected: bool,
}

/// Holds the current link in an `ArcSwap` and the per-subscription stream
/// handles in a separate lock-guarded table.
///
/// Every link replacement bumps the generation. A handle whose generation is
/// behind the link's was torn down by the manager, so errors read from it say
/// nothing about the server.
pub struct ConnectionManager {
    endpoint: String,
    transport: Arc<dyn ConfigTransport>,
    credentials: Arc<dyn CallCredentials>,
    reconnect_config: ReconnectConfig,
    link: ArcSwap<Link>,
    state_tx: watch::Sender<LinkState>,
    handles: RwLock<HashMap<SubscriptionId, Option<StreamHandleSet>>>,
    redialing: Mutex<bool>,
    last_reconnect: Mutex<Option<ReconnectReport>>,
    closed: CancellationToken,
    tasks: TaskTracker,
}

impl ConnectionManager {
    /// Dial the service once. A failed first dial leaves the manager
    /// disconnected with a background reconnect running.
    pub async fn connect(
        endpoint: impl Into<String>,
        transport: Arc<dyn ConfigTransport>,
        credentials: Arc<dyn CallCredentials>,
        reconnect_config: ReconnectConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState {
            generation: 0,
            connected: false,
        });
        let manager = Arc::new(Self {
            endpoint: endpoint.into(),
            transport,
            credentials,
            reconnect_config,
            link: ArcSwap::from_pointee(Link {
                generation: 0,
                conn: None,
            }),
            state_tx,
            handles: RwLock::new(HashMap::new()),
            redialing: Mutex::new(false),
            last_reconnect: Mutex::new(None),
            closed: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });

        match manager.dial().await {
            Ok(conn) => {
                info!(endpoint = %manager.endpoint, "Connected to config service");
                manager.install_link(conn);
            }
            Err(status) => {
                warn!(endpoint = %manager.endpoint, error = %status, "Initial dial failed, reconnecting in background");
                metrics::record_dial_failure();
                manager.start_redial(0);
            }
        }
        manager
    }

    /// Open one transport channel with the per-call credential provider attached.
    pub async fn dial(&self) -> Result<Arc<dyn ConfigConnection>, Status> {
        self.transport
            .connect(&self.endpoint, Arc::clone(&self.credentials))
            .await
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn generation(&self) -> u64 {
        self.link.load().generation
    }

    pub fn is_connected(&self) -> bool {
        self.link.load().conn.is_some()
    }

    /// Current connection and its generation, if connected.
    pub fn current(&self) -> Option<(u64, Arc<dyn ConfigConnection>)> {
        let link = self.link.load();
        link.conn
            .as_ref()
            .map(|conn| (link.generation, Arc::clone(conn)))
    }

    /// True when `generation` belongs to a link that has since been replaced.
    pub fn is_stale(&self, generation: u64) -> bool {
        self.generation() != generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn last_reconnect(&self) -> Option<ReconnectReport> {
        self.last_reconnect.lock().clone()
    }

    /// Tear down the link observed at `observed` and wait for a healthy one.
    ///
    /// Concurrent callers share one redial loop. A caller whose observed
    /// generation has already been replaced by a connected link returns at
    /// once. Returns false only when the manager is closed.
    pub async fn reconnect(self: &Arc<Self>, observed: u64) -> bool {
        if self.is_closed() {
            return false;
        }
        self.start_redial(observed);

        let mut state_rx = self.state_tx.subscribe();
        tokio::select! {
            _ = self.closed.cancelled() => false,
            changed = state_rx.wait_for(|s| s.connected && s.generation > observed) => changed.is_ok(),
        }
    }

    /// Begin a redial episode for `observed` without waiting for it.
    pub(crate) fn start_redial(self: &Arc<Self>, observed: u64) {
        let old = {
            let mut redialing = self.redialing.lock();
            let link = self.link.load();
            let replaced = link.generation != observed && link.conn.is_some();
            if *redialing || replaced || self.is_closed() {
                return;
            }
            *redialing = true;

            let generation = link.generation + 1;
            self.link.store(Arc::new(Link {
                generation,
                conn: None,
            }));
            self.state_tx.send_replace(LinkState {
                generation,
                connected: false,
            });
            link.conn.clone()
        };

        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            this.redial(old).await;
        });
    }

    async fn redial(self: Arc<Self>, old: Option<Arc<dyn ConfigConnection>>) {
        info!(endpoint = %self.endpoint, "Reconnecting to config service");
        if let Some(conn) = old {
            conn.close().await;
        }
        let torn_down: Vec<StreamHandleSet> = self
            .handles
            .write()
            .values_mut()
            .filter_map(Option::take)
            .collect();
        for set in torn_down {
            set.close().await;
        }

        let mut backoff = ReconnectBackoff::from_config(&self.reconnect_config);
        let mut report = ReconnectReport::default();
        loop {
            report.attempts += 1;
            match self.dial_and_rebuild().await {
                Ok((conn, rebuilt)) => {
                    self.finish_redial(conn, rebuilt, report).await;
                    return;
                }
                Err(status) => {
                    metrics::record_dial_failure();
                    let interval = backoff.next_interval();
                    report.delays.push(interval);
                    warn!(
                        attempt = report.attempts,
                        retry_in_ms = interval.as_millis() as u64,
                        error = %status,
                        "Reconnect attempt failed"
                    );
                    tokio::select! {
                        _ = self.closed.cancelled() => {
                            *self.redialing.lock() = false;
                            return;
                        }
                        _ = tokio::time::sleep(interval + backoff.jitter()) => {}
                    }
                }
            }
        }
    }

    /// Dial, then reopen the streams of every registered subscription.
    async fn dial_and_rebuild(
        &self,
    ) -> Result<(Arc<dyn ConfigConnection>, Vec<(SubscriptionId, StreamHandleSet)>), Status> {
        let conn = self.dial().await?;
        let generation = self.generation() + 1;
        let ids: Vec<SubscriptionId> = self.handles.read().keys().cloned().collect();

        let mut rebuilt = Vec::with_capacity(ids.len());
        for id in ids {
            match open_handles(conn.as_ref(), generation).await {
                Ok(set) => rebuilt.push((id, set)),
                Err(status) => {
                    for (_, set) in rebuilt {
                        set.close().await;
                    }
                    conn.close().await;
                    return Err(status);
                }
            }
        }
        Ok((conn, rebuilt))
    }

    async fn finish_redial(
        &self,
        conn: Arc<dyn ConfigConnection>,
        rebuilt: Vec<(SubscriptionId, StreamHandleSet)>,
        report: ReconnectReport,
    ) {
        let mut orphans = Vec::new();
        let installed = {
            let mut table = self.handles.write();
            if self.is_closed() {
                orphans.extend(rebuilt.into_iter().map(|(_, set)| set));
                None
            } else {
                for (id, set) in rebuilt {
                    match table.get_mut(&id) {
                        Some(slot) => *slot = Some(set),
                        None => orphans.push(set),
                    }
                }
                Some(self.swap_link(Arc::clone(&conn)))
            }
        };
        *self.redialing.lock() = false;

        for set in orphans {
            set.close().await;
        }
        let Some(generation) = installed else {
            conn.close().await;
            return;
        };

        info!(generation, attempts = report.attempts, "Reconnected to config service");
        metrics::record_reconnect();
        *self.last_reconnect.lock() = Some(report);
        self.state_tx.send_replace(LinkState {
            generation,
            connected: true,
        });
    }

    fn install_link(&self, conn: Arc<dyn ConfigConnection>) {
        let generation = {
            let _table = self.handles.write();
            self.swap_link(conn)
        };
        self.state_tx.send_replace(LinkState {
            generation,
            connected: true,
        });
    }

    /// Callers hold the handle table's write lock.
    fn swap_link(&self, conn: Arc<dyn ConfigConnection>) -> u64 {
        let generation = self.generation() + 1;
        self.link.store(Arc::new(Link {
            generation,
            conn: Some(conn),
        }));
        generation
    }

    /// Track a subscription. Its handles are opened on first use and rebuilt on every reconnect.
    pub fn register(&self, id: SubscriptionId) {
        self.handles.write().insert(id, None);
    }

    /// Forget a subscription and close its streams.
    pub async fn deregister(&self, id: &SubscriptionId) {
        let removed = self.handles.write().remove(id).flatten();
        if let Some(set) = removed {
            set.close().await;
        }
    }

    /// Handles of `id` on the current link, opening them if needed.
    pub async fn stream_handles(&self, id: &SubscriptionId) -> Result<StreamHandleSet, Status> {
        let (generation, conn) = {
            let table = self.handles.read();
            match table.get(id) {
                None => return Err(Status::canceled(format!("subscription {id} is not registered"))),
                Some(Some(set)) if !self.is_stale(set.generation) => return Ok(set.clone()),
                Some(_) => {}
            }
            self.current()
                .ok_or_else(|| Status::unavailable("not connected to config service"))?
        };

        let opened = open_handles(conn.as_ref(), generation).await?;
        let outcome = {
            let mut table = self.handles.write();
            match table.get_mut(id) {
                None => Err(Status::canceled(format!("subscription {id} is not registered"))),
                Some(_) if self.is_stale(generation) => {
                    Err(Status::unavailable("connection replaced while opening streams"))
                }
                Some(Some(existing)) if !self.is_stale(existing.generation) => Ok(existing.clone()),
                Some(slot) => {
                    *slot = Some(opened.clone());
                    debug!(subscription = %id, generation, "Opened stream handles");
                    return Ok(opened);
                }
            }
        };
        opened.close().await;
        outcome
    }

    /// Stop reconnecting and close the link and every stream handle.
    pub async fn close(&self) {
        self.closed.cancel();
        let (old, sets) = {
            let mut table = self.handles.write();
            let old = self.link.swap(Arc::new(Link {
                generation: self.generation() + 1,
                conn: None,
            }));
            let sets: Vec<StreamHandleSet> = table.drain().filter_map(|(_, set)| set).collect();
            (old, sets)
        };
        self.state_tx.send_replace(LinkState {
            generation: self.generation(),
            connected: false,
        });

        for set in sets {
            set.close().await;
        }
        if let Some(conn) = old.conn.as_ref() {
            conn.close().await;
        }
        self.tasks.close();
        self.tasks.wait().await;
        debug!(endpoint = %self.endpoint, "Connection manager closed");
    }
}

async fn open_handles(
    conn: &dyn ConfigConnection,
    generation: u64,
) -> Result<StreamHandleSet, Status> {
    let listen = conn.open_listen().await?;
    let put = match conn.open_put().await {
        Ok(put) => put,
        Err(status) => {
            listen.close().await;
            return Err(status);
        }
    };
    Ok(StreamHandleSet {
        generation,
        listen,
        put,
    })
}
