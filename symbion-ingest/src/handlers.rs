//! Per-record side effects.
//!
//! A [`RecordHandler`] belongs to one topic worker. Decoding and the file
//! mirror run inline on the worker; database writes and notifications are
//! submitted to the shared pools and never awaited by the worker.
//!
//! ```text
//! LOG    ─► format time ─► file line ─► keyword match ─┬─► notifier pool    (send alert text)
//!                                                      └─► persistence pool (alert row)
//! METRIC ─► console summary ─► pretty JSON block ─► persistence pool (snapshot row ─► usage rows)
//! ```

use crate::dispatch::{decode, Record, RecordType};
use crate::error::DispatchError;
use crate::file_sink::{format_local, FileSink};
use crate::models::{AlertRecord, LogEvent, ServerStorageSnapshot};
use crate::notifier::{RateLimitedNotifier, SendOutcome};
use crate::pool::TaskPool;
use crate::sinks::{persist_snapshot, Sinks};
use crate::stats::IngestStats;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Collaborators shared by every worker, owned by the supervisor
#[derive(Clone)]
pub struct Services {
    pub sinks: Sinks,
    pub notifier: Arc<RateLimitedNotifier>,
    pub persistence_pool: Arc<TaskPool>,
    pub notifier_pool: Arc<TaskPool>,
    pub matcher: Arc<AlertMatcher>,
    pub stats: IngestStats,
}

/// Case-insensitive substring match against the configured keywords.
///
/// Blank keywords are ignored so that an empty entry cannot match every line.
#[derive(Debug, Clone, Default)]
pub struct AlertMatcher {
    keywords: Vec<String>,
}

impl AlertMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn matches(&self, message: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let lower = message.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// `<formatted-time> [<serverName>] <message>`
pub fn log_line(formatted_time: &str, event: &LogEvent) -> String {
    format!("{} [{}] {}", formatted_time, event.server_name, event.message)
}

/// Text sent to the notification channel for a matched event
pub fn alert_text(formatted_time: &str, event: &LogEvent) -> String {
    format!(
        "ALERT\n Time: {}\n Host: {}\n File: {}\n Topic: {}\n Message: {}",
        formatted_time, event.server_name, event.path, event.topic, event.message
    )
}

pub struct RecordHandler {
    topic: String,
    record_type: RecordType,
    file: FileSink,
    services: Services,
}

impl RecordHandler {
    pub fn new(topic: impl Into<String>, record_type: RecordType, file: FileSink, services: Services) -> Self {
        Self {
            topic: topic.into(),
            record_type,
            file,
            services,
        }
    }

    /// Decodes one payload and runs its side effects.
    ///
    /// Only decode and unsupported-type failures are returned; everything past
    /// decoding is logged and absorbed.
    pub async fn dispatch(&mut self, payload: &[u8]) -> Result<(), DispatchError> {
        match decode(&self.record_type, payload)? {
            Record::Log { event, at } => self.handle_log(event, at).await,
            Record::Metric { snapshot, .. } => self.handle_metric(snapshot).await,
        }
        Ok(())
    }

    async fn handle_log(&mut self, event: LogEvent, at: DateTime<Utc>) {
        let formatted = format_local(&at);
        info!("[{}] ({}) {}", formatted, event.topic, event.message);

        if let Err(e) = self.file.append_line(&log_line(&formatted, &event)).await {
            self.services.stats.record_file_write_failure();
            warn!(topic = %self.topic, "file write failed: {e}");
        }

        if !self.services.matcher.matches(&event.message) {
            return;
        }
        self.services.stats.record_alert();

        let text = alert_text(&formatted, &event);
        let notifier = Arc::clone(&self.services.notifier);
        let stats = self.services.stats.clone();
        self.submit(&self.services.notifier_pool, "send_alert", async move {
            match notifier.send(&text).await {
                SendOutcome::Delivered { .. } => stats.record_notification_delivered(),
                SendOutcome::Dropped { .. } => stats.record_notification_dropped(),
            }
        });

        let alert = AlertRecord::from_event(&event, at);
        let sinks = self.services.sinks.clone();
        let stats = self.services.stats.clone();
        let topic = self.topic.clone();
        self.submit(&self.services.persistence_pool, "save_alert", async move {
            match sinks.alerts.save_alert(&alert).await {
                Ok(()) => stats.record_persisted(),
                Err(e) => {
                    stats.record_persistence_failure();
                    error!(topic = %topic, label = e.as_label(), "[LOG][DB] failed to save alert: {e}");
                }
            }
        });
    }

    async fn handle_metric(&mut self, snapshot: ServerStorageSnapshot) {
        info!("===== SYSTEM STORAGE METRIC RECEIVED =====");
        info!("Server   : {}", snapshot.server_name);
        info!("IP       : {}", snapshot.server_ip);
        info!("Timestamp: {}", snapshot.timestamp);
        for usage in &snapshot.mount_path_storage_usages {
            info!(
                "Path: {:<12} | Used: {:6.2}% | Used: {} / {} bytes",
                usage.path, usage.used_percent, usage.used_bytes, usage.total_bytes
            );
        }

        if let Err(e) = self.file.append_pretty(&snapshot).await {
            self.services.stats.record_file_write_failure();
            warn!(topic = %self.topic, "file write failed: {e}");
        }

        let sinks = self.services.sinks.clone();
        let stats = self.services.stats.clone();
        let topic = self.topic.clone();
        self.submit(&self.services.persistence_pool, "save_snapshot", async move {
            match persist_snapshot(&sinks, &snapshot).await {
                Ok((id, rows)) => {
                    stats.record_persisted();
                    info!(topic = %topic, snapshot_id = id, rows, "storage snapshot saved");
                }
                Err(e) => {
                    stats.record_persistence_failure();
                    error!(topic = %topic, label = e.as_label(), "[METRIC][DB] failed to save storage metrics: {e}");
                }
            }
        });
    }

    fn submit<F>(&self, pool: &TaskPool, task: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Err(e) = pool.submit(task, fut) {
            self.services.stats.record_pool_rejection();
            warn!(topic = %self.topic, "{e}");
        }
    }
}
