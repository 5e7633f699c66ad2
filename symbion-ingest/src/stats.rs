use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide counters, cloned cheaply into every worker and background task
#[derive(Clone)]
pub struct IngestStats {
    start_time: Instant,
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    consumed: AtomicU64,
    decode_failures: AtomicU64,
    file_write_failures: AtomicU64,
    alerts_raised: AtomicU64,
    persisted: AtomicU64,
    persistence_failures: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_dropped: AtomicU64,
    pool_rejections: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub consumed: u64,
    pub decode_failures: u64,
    pub file_write_failures: u64,
    pub alerts_raised: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
    pub notifications_delivered: u64,
    pub notifications_dropped: u64,
    pub pool_rejections: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.inner.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            inner: Arc::new(Counters::default()),
        }
    }

    counter!(record_consumed, consumed);
    counter!(record_decode_failure, decode_failures);
    counter!(record_file_write_failure, file_write_failures);
    counter!(record_alert, alerts_raised);
    counter!(record_persisted, persisted);
    counter!(record_persistence_failure, persistence_failures);
    counter!(record_notification_delivered, notifications_delivered);
    counter!(record_notification_dropped, notifications_dropped);
    counter!(record_pool_rejection, pool_rejections);

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.inner;
        StatsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            consumed: c.consumed.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            file_write_failures: c.file_write_failures.load(Ordering::Relaxed),
            alerts_raised: c.alerts_raised.load(Ordering::Relaxed),
            persisted: c.persisted.load(Ordering::Relaxed),
            persistence_failures: c.persistence_failures.load(Ordering::Relaxed),
            notifications_delivered: c.notifications_delivered.load(Ordering::Relaxed),
            notifications_dropped: c.notifications_dropped.load(Ordering::Relaxed),
            pool_rejections: c.pool_rejections.load(Ordering::Relaxed),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}
