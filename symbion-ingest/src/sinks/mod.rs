//! Persistence sinks: three independent append-only stores.
//!
//! Every store must tolerate concurrent calls from unrelated alerts and
//! snapshots, since the persistence pool runs several tasks at once.
//!
//! The only ordering rule is inside one snapshot: the parent row is inserted
//! first and its generated identifier tags every child row. See
//! [`persist_snapshot`].

pub mod postgres;

use crate::error::PersistenceError;
use crate::models::{AlertRecord, MountPathStorageUsage, ServerStorageSnapshot};
use async_trait::async_trait;
use std::sync::Arc;

pub use postgres::PgStores;

/// Identifier generated for a persisted snapshot row
pub type SnapshotId = i64;

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn save_alert(&self, alert: &AlertRecord) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Inserts the snapshot row and returns its generated identifier
    async fn save_snapshot(&self, snapshot: &ServerStorageSnapshot) -> Result<SnapshotId, PersistenceError>;
}

#[async_trait]
pub trait MountUsageStore: Send + Sync {
    async fn save_usage(&self, snapshot_id: SnapshotId, usage: &MountPathStorageUsage) -> Result<(), PersistenceError>;
}

/// Handles to the three stores, cloned into every worker
#[derive(Clone)]
pub struct Sinks {
    pub alerts: Arc<dyn AlertStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub usages: Arc<dyn MountUsageStore>,
}

impl Sinks {
    /// One backend serving all three tables
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AlertStore + SnapshotStore + MountUsageStore + 'static,
    {
        Self {
            alerts: backend.clone(),
            snapshots: backend.clone(),
            usages: backend,
        }
    }
}

/// Persists a snapshot and then its usage rows under the new identifier.
///
/// No child row is written if the parent insert fails; the first child
/// failure stops the task. Returns the identifier and the number of rows.
pub async fn persist_snapshot(
    sinks: &Sinks,
    snapshot: &ServerStorageSnapshot,
) -> Result<(SnapshotId, usize), PersistenceError> {
    let id = sinks.snapshots.save_snapshot(snapshot).await?;
    for usage in &snapshot.mount_path_storage_usages {
        sinks.usages.save_usage(id, usage).await?;
    }
    Ok((id, snapshot.mount_path_storage_usages.len()))
}
