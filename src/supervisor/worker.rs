//! The four stream workers of a Listen session.
//!
//! All four share one failure policy (`Worker::recover`):
//! - a status read from a handle of a replaced link is transient
//! - Terminal stops the worker
//! - Retriable waits for the shared reconnect, then retries
//! - Transient pauses for the receive retry delay, then retries

use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cache::FileCache;
use crate::config::ListenConfig;
use crate::connection::{ConnectionManager, StreamHandleSet};
use crate::observability::metrics;
use crate::resilience::{classify, ErrorClass};
use crate::store::{ApplyOptions, ConfigRecord, ConfigStore, SubscriptionId};
use crate::supervisor::probe::{Role, SessionProbe};
use crate::supervisor::OnChange;
use crate::transport::{PutConfigRequest, Status, UpdateConfigMessage};

/// Everything the workers of one session share.
pub struct WorkerContext {
    pub id: SubscriptionId,
    pub store: Arc<ConfigStore>,
    pub manager: Arc<ConnectionManager>,
    pub cache: Arc<FileCache>,
    pub listen: ListenConfig,
    pub mirror_env: bool,
    pub on_change: Option<OnChange>,
}

/// A failure together with the link generation it was observed on.
type Failure = (u64, Status);

enum Recovery {
    Retry,
    Stop(&'static str),
}

pub(crate) struct Worker {
    role: Role,
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
    probe: SessionProbe,
}

impl Worker {
    pub(crate) fn new(
        role: Role,
        ctx: Arc<WorkerContext>,
        cancel: CancellationToken,
        probe: SessionProbe,
    ) -> Self {
        probe.set_alive(role, true);
        Self {
            role,
            ctx,
            cancel,
            probe,
        }
    }

    pub(crate) async fn run(self) {
        let reason = match self.role {
            Role::ListenSend => self.listen_send().await,
            Role::ListenRecv => self.listen_recv().await,
            Role::PutSend => self.put_send().await,
            Role::PutRecv => self.put_recv().await,
        };
        self.probe.set_alive(self.role, false);
        metrics::record_worker_exit(self.role.as_str(), reason);
        debug!(subscription = %self.ctx.id, role = %self.role, reason, "Worker exited");
    }

    /// Subscribe frame at once, then the current versions every interval.
    async fn listen_send(&self) -> &'static str {
        let mut ticker = interval(self.ctx.listen.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return "shutdown",
                _ = ticker.tick() => {}
            }
            loop {
                let sent = tokio::select! {
                    _ = self.cancel.cancelled() => return "shutdown",
                    sent = self.send_versions() => sent,
                };
                match sent {
                    Ok(()) => break,
                    Err(failure) => {
                        if let Recovery::Stop(reason) = self.recover(failure).await {
                            return reason;
                        }
                    }
                }
            }
        }
    }

    async fn send_versions(&self) -> Result<(), Failure> {
        let handles = self.handles().await?;
        let frame = self.ctx.store.versions();
        trace!(subscription = %self.ctx.id, version = %frame.version, "Sending versions frame");
        handles
            .listen
            .send(frame)
            .await
            .map_err(|status| (handles.generation, status))
    }

    /// Apply every delta pushed on the listen stream.
    async fn listen_recv(&self) -> &'static str {
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => return "shutdown",
                received = self.recv_delta() => received,
            };
            let failure = match received {
                Ok(delta) => {
                    self.apply(&delta, "listen");
                    continue;
                }
                Err(failure) => failure,
            };
            if let Recovery::Stop(reason) = self.recover(failure).await {
                return reason;
            }
        }
    }

    async fn recv_delta(&self) -> Result<ConfigRecord, Failure> {
        let handles = self.handles().await?;
        match handles.listen.recv().await {
            Ok(Some(delta)) => Ok(delta),
            Ok(None) => Err((
                handles.generation,
                Status::canceled("listen stream ended by server"),
            )),
            Err(status) => Err((handles.generation, status)),
        }
    }

    /// Registration frame on every new stream, heartbeats in between.
    async fn put_send(&self) -> &'static str {
        let mut ticker = interval(self.ctx.listen.heartbeat());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut registered_on: Option<u64> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return "shutdown",
                _ = ticker.tick() => {}
            }
            loop {
                let sent = tokio::select! {
                    _ = self.cancel.cancelled() => return "shutdown",
                    sent = self.send_put_frame(registered_on) => sent,
                };
                match sent {
                    Ok(generation) => {
                        registered_on = Some(generation);
                        break;
                    }
                    Err(failure) => {
                        if let Recovery::Stop(reason) = self.recover(failure).await {
                            return reason;
                        }
                    }
                }
            }
        }
    }

    async fn send_put_frame(&self, registered_on: Option<u64>) -> Result<u64, Failure> {
        let handles = self.handles().await?;
        let key = self.ctx.id.key();
        let frame = if registered_on == Some(handles.generation) {
            PutConfigRequest::heartbeat(key)
        } else {
            PutConfigRequest::registration(key)
        };
        handles
            .put
            .send(frame)
            .await
            .map(|()| handles.generation)
            .map_err(|status| (handles.generation, status))
    }

    /// Acknowledge and apply every update notification.
    async fn put_recv(&self) -> &'static str {
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => return "shutdown",
                received = self.recv_update() => received,
            };
            match received {
                Ok((message, delta)) => {
                    if !self.acknowledge(message).await {
                        return "shutdown";
                    }
                    self.apply(&delta, "put");
                }
                Err(failure) => {
                    if let Recovery::Stop(reason) = self.recover(failure).await {
                        return reason;
                    }
                }
            }
        }
    }

    async fn recv_update(&self) -> Result<(UpdateConfigMessage, ConfigRecord), Failure> {
        let handles = self.handles().await?;
        match handles.put.recv().await {
            Ok(Some(response)) => Ok((response.message, response.config)),
            Ok(None) => Err((
                handles.generation,
                Status::canceled("put stream ended by server"),
            )),
            Err(status) => Err((handles.generation, status)),
        }
    }

    /// Best effort: one retry, then give up and apply anyway.
    ///
    /// Unary calls carry no deadline, so each attempt races the session's
    /// cancellation. Returns false when cancelled.
    async fn acknowledge(&self, message: UpdateConfigMessage) -> bool {
        for attempt in 1..=2 {
            let Some((_, conn)) = self.ctx.manager.current() else {
                break;
            };
            let acked = tokio::select! {
                _ = self.cancel.cancelled() => return false,
                acked = conn.delete_message(message.clone()) => acked,
            };
            match acked {
                Ok(response) if response.is_success() => return true,
                Ok(response) => {
                    debug!(message = %message.key, attempt, result = %response.result, "Acknowledgement rejected");
                }
                Err(status) => {
                    debug!(message = %message.key, attempt, error = %status, "Acknowledgement failed");
                }
            }
        }
        warn!(subscription = %self.ctx.id, message = %message.key, "Update not acknowledged");
        true
    }

    async fn handles(&self) -> Result<StreamHandleSet, Failure> {
        let generation = self.ctx.manager.generation();
        self.ctx
            .manager
            .stream_handles(&self.ctx.id)
            .await
            .map_err(|status| (generation, status))
    }

    fn apply(&self, delta: &ConfigRecord, source: &'static str) {
        let options = ApplyOptions {
            cache: Some(self.ctx.cache.as_ref()),
            mirror_env: self.ctx.mirror_env,
        };
        match self.ctx.store.apply(delta, &options) {
            Ok(events) => {
                metrics::record_delta_applied(source);
                debug!(
                    subscription = %self.ctx.id,
                    source,
                    changes = events.len(),
                    "Applied config delta"
                );
                if let Some(on_change) = &self.ctx.on_change {
                    for event in &events {
                        on_change(event);
                    }
                }
            }
            Err(e) => {
                warn!(subscription = %self.ctx.id, source, error = %e, "Discarding undecodable delta");
            }
        }
    }

    async fn recover(&self, (generation, status): Failure) -> Recovery {
        let class = if self.ctx.manager.is_stale(generation) {
            ErrorClass::Transient
        } else {
            classify(&status)
        };

        match class {
            ErrorClass::Terminal => {
                info!(
                    subscription = %self.ctx.id,
                    role = %self.role,
                    error = %status,
                    "Stopping worker on terminal error"
                );
                Recovery::Stop("terminal")
            }
            ErrorClass::Retriable => {
                debug!(subscription = %self.ctx.id, role = %self.role, error = %status, "Waiting for reconnect");
                tokio::select! {
                    _ = self.cancel.cancelled() => Recovery::Stop("shutdown"),
                    healthy = self.ctx.manager.reconnect(generation) => {
                        if healthy { Recovery::Retry } else { Recovery::Stop("closed") }
                    }
                }
            }
            ErrorClass::Transient => {
                trace!(subscription = %self.ctx.id, role = %self.role, error = %status, "Retrying after pause");
                tokio::select! {
                    _ = self.cancel.cancelled() => Recovery::Stop("shutdown"),
                    _ = tokio::time::sleep(self.ctx.listen.recv_retry()) => Recovery::Retry,
                }
            }
        }
    }
}
