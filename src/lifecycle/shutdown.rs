//! Shutdown coordination for a group of workers.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Coordinator for graceful shutdown.
///
/// Every task spawned through it can observe the same cancellation token,
/// and `wait` returns once all of them have finished.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// A coordinator cancelled together with `parent`.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            tracker: TaskTracker::new(),
        }
    }

    /// Token the spawned tasks select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a tracked task.
    pub fn spawn<F>(&self, role: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(role, "Spawning tracked task");
        self.tracker.spawn(task);
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for every spawned task to finish. Call after `trigger`.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
