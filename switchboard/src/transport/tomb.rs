use std::{future::Future, sync::Arc};

use k_lock::Mutex;
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Cooperative termination for a transport and everything running on it.
///
/// `kill` records a reason and tells every consumer to wind down: transports stop taking new
/// work, and servers stop accepting requests while finishing the ones they have. `wait`
/// returns once the tomb has been killed and every task spawned through it has finished.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct Tomb {
    state: Arc<TombState>,
}

#[derive(Debug, Default)]
struct TombState {
    dying: CancellationToken,
    tracker: TaskTracker,
    reason: Mutex<Option<String>>,
}

impl Tomb {
    /// A live tomb.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start shutting down. The first reason is kept; later kills are no-ops.
    pub fn kill(&self, reason: impl Into<String>) {
        {
            let mut current = self.state.reason.lock().expect("must not be poisoned");
            if current.is_some() {
                return;
            }
            let reason = reason.into();
            log::info!("killing transport: {reason}");
            *current = Some(reason);
        }
        self.state.dying.cancel();
        self.state.tracker.close();
    }

    /// True once killed.
    pub fn is_dying(&self) -> bool {
        self.state.dying.is_cancelled()
    }

    /// Why the tomb was killed.
    pub fn reason(&self) -> Option<String> {
        self.state
            .reason
            .lock()
            .expect("must not be poisoned")
            .clone()
    }

    /// Completes once killed.
    pub async fn dying(&self) {
        self.state.dying.cancelled().await
    }

    /// Run a task that `wait` will wait for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.state.tracker.spawn(task)
    }

    /// How many tracked tasks are still running.
    pub fn running(&self) -> usize {
        self.state.tracker.len()
    }

    /// Wait for the kill, then for every tracked task to finish.
    pub async fn wait(&self) {
        self.dying().await;
        self.state.tracker.wait().await;
    }
}
