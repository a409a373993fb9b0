//! One Listen session: four workers bound to one subscription.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::lifecycle::Shutdown;
use crate::store::SubscriptionId;
use crate::supervisor::probe::{Role, SessionProbe};
use crate::supervisor::worker::{Worker, WorkerContext};

pub struct ListenSession {
    id: SubscriptionId,
    ctx: Arc<WorkerContext>,
    shutdown: Shutdown,
    probe: SessionProbe,
}

impl ListenSession {
    /// Register the subscription and spawn its workers. The session is also
    /// stopped when `parent` is cancelled.
    pub fn start(ctx: WorkerContext, parent: &CancellationToken) -> Self {
        let ctx = Arc::new(ctx);
        let id = ctx.id.clone();
        ctx.manager.register(id.clone());

        let shutdown = Shutdown::child_of(parent);
        let probe = SessionProbe::new();
        for role in Role::ALL {
            let worker = Worker::new(role, Arc::clone(&ctx), shutdown.token(), probe.clone());
            shutdown.spawn(role.as_str(), worker.run());
        }
        info!(subscription = %id, "Listen session started");

        Self {
            id,
            ctx,
            shutdown,
            probe,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn probe(&self) -> SessionProbe {
        self.probe.clone()
    }

    /// Cancel every worker, join them, then release the stream handles.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        self.shutdown.wait().await;
        self.ctx.manager.deregister(&self.id).await;
        info!(subscription = %self.id, "Listen session stopped");
    }
}
