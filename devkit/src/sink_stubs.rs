/*!
Stores de persistance et transport de notification pour tests

`RecordingStores` enregistre chaque ligne "insérée" (identifiants générés à
partir de 1). `ScriptedTransport` rejoue une liste de résultats puis réussit,
et note l'instant de chaque tentative.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use symbion_ingest::error::{NotifyError, PersistenceError};
use symbion_ingest::models::{AlertRecord, MountPathStorageUsage, ServerStorageSnapshot};
use symbion_ingest::notifier::AlertTransport;
use symbion_ingest::sinks::{AlertStore, MountUsageStore, SnapshotId, SnapshotStore};
use tokio::time::Instant;

#[derive(Default)]
pub struct RecordingStores {
    alerts: Mutex<Vec<AlertRecord>>,
    snapshots: Mutex<Vec<(SnapshotId, ServerStorageSnapshot)>>,
    usages: Mutex<Vec<(SnapshotId, MountPathStorageUsage)>>,
    next_id: Mutex<SnapshotId>,
    fail_alerts: AtomicBool,
    fail_snapshots: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simule une base indisponible
    pub fn fail_alerts(&self, fail: bool) {
        self.fail_alerts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    /// Latence ajoutée à chaque insertion
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().clone()
    }

    pub fn snapshots(&self) -> Vec<(SnapshotId, ServerStorageSnapshot)> {
        self.snapshots.lock().clone()
    }

    pub fn usages(&self) -> Vec<(SnapshotId, MountPathStorageUsage)> {
        self.usages.lock().clone()
    }

    async fn latency(&self) {
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl AlertStore for RecordingStores {
    async fn save_alert(&self, alert: &AlertRecord) -> Result<(), PersistenceError> {
        self.latency().await;
        if self.fail_alerts.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("alert table offline".into()));
        }
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for RecordingStores {
    async fn save_snapshot(&self, snapshot: &ServerStorageSnapshot) -> Result<SnapshotId, PersistenceError> {
        self.latency().await;
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("snapshot table offline".into()));
        }
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.snapshots.lock().push((id, snapshot.clone()));
        Ok(id)
    }
}

#[async_trait]
impl MountUsageStore for RecordingStores {
    async fn save_usage(&self, snapshot_id: SnapshotId, usage: &MountPathStorageUsage) -> Result<(), PersistenceError> {
        self.latency().await;
        self.usages.lock().push((snapshot_id, usage.clone()));
        Ok(())
    }
}

/// Une tentative de livraison vue par le transport
#[derive(Debug, Clone)]
pub struct Delivery {
    pub at: Instant,
    pub text: String,
    pub result: Result<(), NotifyError>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), NotifyError>>>,
    attempts: Mutex<Vec<Delivery>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Résultats des prochaines tentatives, dans l'ordre; ensuite tout réussit
    pub fn script(&self, results: impl IntoIterator<Item = Result<(), NotifyError>>) {
        self.script.lock().extend(results);
    }

    pub fn attempts(&self) -> Vec<Delivery> {
        self.attempts.lock().clone()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.attempts
            .lock()
            .iter()
            .filter(|d| d.result.is_ok())
            .map(|d| d.text.clone())
            .collect()
    }
}

#[async_trait]
impl AlertTransport for ScriptedTransport {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        let result = self.script.lock().pop_front().unwrap_or(Ok(()));
        self.attempts.lock().push(Delivery {
            at: Instant::now(),
            text: text.to_string(),
            result: result.clone(),
        });
        log::info!("📤 [MOCK] notification attempt: {:?}", result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transport_replays_script() {
        let transport = ScriptedTransport::new();
        transport.script([Err(NotifyError::Timeout("read".into()))]);

        assert!(transport.deliver("a").await.is_err());
        assert!(transport.deliver("a").await.is_ok());
        assert_eq!(transport.attempts().len(), 2);
        assert_eq!(transport.delivered(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_ids_increase() {
        let stores = RecordingStores::new();
        let snap = ServerStorageSnapshot {
            system_id: "s".into(),
            system_name: "n".into(),
            server_ip: "10.0.0.1".into(),
            server_name: "h".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
            mount_path_storage_usages: vec![],
        };
        assert_eq!(stores.save_snapshot(&snap).await.unwrap(), 1);
        assert_eq!(stores.save_snapshot(&snap).await.unwrap(), 2);
    }
}
