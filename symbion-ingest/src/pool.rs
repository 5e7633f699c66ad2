//! # Bounded background task pools.
//!
//! A [`TaskPool`] runs fire-and-forget side effects (database writes, alert
//! delivery) off the topic workers. Submission never blocks: the task is
//! spawned immediately and waits for one of `concurrency` permits.
//!
//! ```text
//! submit(task) ─► closed? ─► PoolError::Closed
//!              └► tracker.spawn( select! {
//!                     cancel.cancelled() ─► abandoned
//!                     permit ─► task.await
//!                 })
//!
//! shutdown(grace):
//!   tracker.close()                          (reject new work)
//!   timeout(grace, tracker.wait())
//!     ├─ Ok  ─► DrainOutcome::Drained
//!     └─ Err ─► cancel.cancel() ─► DrainOutcome::Forced { abandoned }
//! ```
//!
//! Completion is reported through logging only; nothing flows back to the submitter.

use crate::error::PoolError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Result of draining a pool on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every submitted task finished within the grace period.
    Drained,
    /// Grace period exceeded; the remaining tasks were cancelled.
    Forced { abandoned: usize },
}

pub struct TaskPool {
    name: String,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TaskPool {
    /// Creates a pool running at most `concurrency` tasks at once (minimum 1).
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Submits `fut` without waiting for it to start.
    pub fn submit<F>(&self, task: &'static str, fut: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(PoolError::Closed {
                pool: self.name.clone(),
                task,
            });
        }

        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();
        let pool = self.name.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(pool = %pool, task, "background task abandoned at shutdown");
                }
                _ = async {
                    let Ok(_permit) = permits.acquire_owned().await else { return };
                    fut.await;
                } => {
                    debug!(pool = %pool, task, "background task finished");
                }
            }
        });
        Ok(())
    }

    /// Stops accepting work, waits up to `grace`, then cancels what is left.
    ///
    /// Safe to call more than once; later calls see an already closed pool.
    pub async fn shutdown(&self, grace: Duration) -> DrainOutcome {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return DrainOutcome::Drained;
        }

        let abandoned = self.tracker.len();
        self.cancel.cancel();
        self.tracker.wait().await;
        DrainOutcome::Forced { abandoned }
    }
}
