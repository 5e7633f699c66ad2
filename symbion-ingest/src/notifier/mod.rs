//! Rate-limited alert notifier shared by every topic worker.
//!
//! Sends are serialized through one FIFO async lock guarding the earliest
//! instant the next send may start. A caller holding the schedule waits until
//! that instant, makes up to `max_attempts` delivery attempts, then moves the
//! schedule to `completion + min_interval`. Consequently no two sends complete
//! within `min_interval` of each other, whichever worker submitted them.
//!
//! Failures never propagate: [`SendOutcome`] tells the caller what happened
//! and the notifier logs it.

pub mod telegram;

use crate::error::NotifyError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub use telegram::TelegramTransport;

/// One delivery attempt to the external channel
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotifierSettings {
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1000),
        }
    }
}

impl From<&crate::config::NotifierConf> for NotifierSettings {
    fn from(conf: &crate::config::NotifierConf) -> Self {
        Self {
            min_interval: Duration::from_millis(conf.min_interval_ms),
            max_attempts: conf.max_attempts.max(1),
            retry_backoff: Duration::from_millis(conf.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Delivered { attempts: u32 },
    /// Retries exhausted or a non-retryable failure; the message is gone
    Dropped { attempts: u32, error: NotifyError },
}

pub struct RateLimitedNotifier {
    transport: Arc<dyn AlertTransport>,
    settings: NotifierSettings,
    next_send_at: Mutex<Option<Instant>>,
}

impl RateLimitedNotifier {
    pub fn new(transport: Arc<dyn AlertTransport>, settings: NotifierSettings) -> Self {
        Self {
            transport,
            settings,
            next_send_at: Mutex::new(None),
        }
    }

    /// Delivers `message`, waiting for the rate limit and retrying transient failures.
    ///
    /// Blocks the calling background task, never a topic worker.
    pub async fn send(&self, message: &str) -> SendOutcome {
        let mut schedule = self.next_send_at.lock().await;
        if let Some(at) = *schedule {
            tokio::time::sleep_until(at).await;
        }

        let outcome = self.attempt_delivery(message).await;
        *schedule = Some(Instant::now() + self.settings.min_interval);
        drop(schedule);

        match &outcome {
            SendOutcome::Delivered { attempts } => {
                info!(attempts, "alert notification delivered");
            }
            SendOutcome::Dropped { attempts, error } => {
                error!(attempts, label = error.as_label(), "alert notification dropped: {error}");
            }
        }
        outcome
    }

    async fn attempt_delivery(&self, message: &str) -> SendOutcome {
        let max = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.deliver(message).await {
                Ok(()) => return SendOutcome::Delivered { attempts: attempt },
                Err(e) if e.is_retryable() && attempt < max => {
                    warn!(attempt, max, "notification attempt failed, retrying: {e}");
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(e) => {
                    return SendOutcome::Dropped {
                        attempts: attempt,
                        error: e,
                    }
                }
            }
        }
    }
}
