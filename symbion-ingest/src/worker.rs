//! # Topic worker: the poll loop of one subscription.
//!
//! ```text
//! Running ──(cancel observed / fatal error)──► Draining ──(subscription closed)──► Closed
//!
//! loop while not cancelled:
//!   poll(timeout) ─► Err  ─► warn, sleep(reconnect_delay) unless cancelled
//!                └► batch ─► for msg in order: handler.dispatch(msg)
//!                                 ├─ UnsupportedType        ─► fatal
//!                                 ├─ Decode + Stop          ─► fatal
//!                                 └─ Decode + Skip          ─► warn, next
//!                            commit(batch)
//! ```
//!
//! The poll itself is never raced against cancellation: a call in flight
//! always returns (bounded by the poll timeout) before the worker looks at
//! the token again.

use crate::broker::Subscription;
use crate::error::{DispatchError, WorkerError};
use crate::handlers::RecordHandler;
use crate::policies::FailurePolicy;
use crate::state::{StatusRegistry, WorkerState};
use crate::stats::IngestStats;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerSettings {
    pub poll_timeout: Duration,
    pub reconnect_delay: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_secs(2),
            failure_policy: FailurePolicy::Stop,
        }
    }
}

pub struct TopicWorker {
    subscription: Box<dyn Subscription>,
    handler: RecordHandler,
    settings: WorkerSettings,
    status: StatusRegistry,
    stats: IngestStats,
    state: WorkerState,
}

impl TopicWorker {
    pub fn new(
        subscription: Box<dyn Subscription>,
        handler: RecordHandler,
        settings: WorkerSettings,
        status: StatusRegistry,
        stats: IngestStats,
    ) -> Self {
        status.set_state(subscription.topic(), WorkerState::Running);
        Self {
            subscription,
            handler,
            settings,
            status,
            stats,
            state: WorkerState::Running,
        }
    }

    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }

    /// Consumes until `cancel` fires or a fatal error occurs, then releases
    /// the subscription. `Ok` means the worker was cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WorkerError> {
        info!(topic = %self.topic(), "topic worker started");
        let result = self.poll_loop(&cancel).await;

        self.transition(WorkerState::Draining);
        self.subscription.close().await;
        self.transition(WorkerState::Closed);
        info!(topic = %self.topic(), "topic worker closed");
        result
    }

    async fn poll_loop(&mut self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        while !cancel.is_cancelled() {
            let batch = match self.subscription.poll(self.settings.poll_timeout).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(topic = %self.topic(), label = e.as_label(), "poll failed: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                        _ = cancel.cancelled() => {}
                    }
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }

            debug!(topic = %self.topic(), messages = batch.len(), "batch received");
            for message in &batch {
                self.stats.record_consumed();
                if let Err(e) = self.handler.dispatch(&message.payload).await {
                    self.on_dispatch_error(e)?;
                }
            }

            if let Err(e) = self.subscription.commit().await {
                warn!(topic = %self.topic(), label = e.as_label(), "commit failed: {e}");
            }
        }
        Ok(())
    }

    fn on_dispatch_error(&self, error: DispatchError) -> Result<(), WorkerError> {
        let fatal = match &error {
            DispatchError::UnsupportedType(_) => true,
            DispatchError::Decode(_) => {
                self.stats.record_decode_failure();
                self.settings.failure_policy == FailurePolicy::Stop
            }
        };
        if fatal {
            return Err(WorkerError::Dispatch {
                topic: self.topic().to_string(),
                source: error,
            });
        }
        warn!(topic = %self.topic(), label = error.as_label(), "skipping message: {error}");
        Ok(())
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(topic = %self.topic(), from = ?self.state, to = ?next, "worker state");
        self.state = next;
        self.status.set_state(self.subscription.topic(), next);
    }
}
