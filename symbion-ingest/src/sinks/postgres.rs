//! PostgreSQL implementation of the three stores over one shared client.
//!
//! `tokio_postgres::Client` pipelines concurrent queries, so the persistence
//! pool can use it from several tasks without extra locking.

use super::{AlertStore, MountUsageStore, SnapshotId, SnapshotStore};
use crate::config::{is_valid_table_name, DatabaseConf, TableConf};
use crate::error::PersistenceError;
use crate::models::{AlertRecord, MountPathStorageUsage, ServerStorageSnapshot};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

/// Insert statements built once from the configured table names
#[derive(Debug, Clone, PartialEq)]
pub struct Statements {
    pub insert_alert: String,
    pub insert_snapshot: String,
    pub insert_usage: String,
}

impl Statements {
    pub fn new(tables: &TableConf) -> Result<Self, PersistenceError> {
        for name in [
            &tables.alert_log_table,
            &tables.server_storage_snapshot_table,
            &tables.mount_path_storage_usage_table,
        ] {
            if !is_valid_table_name(name) {
                return Err(PersistenceError::InvalidTable(name.clone()));
            }
        }

        Ok(Self {
            insert_alert: format!(
                "INSERT INTO {} (topic, server_name, file_path, event_timestamp, message) \
                 VALUES ($1, $2, $3, $4, $5)",
                tables.alert_log_table
            ),
            insert_snapshot: format!(
                "INSERT INTO {} (system_id, system_name, server_ip, server_name, collected_at) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
                tables.server_storage_snapshot_table
            ),
            insert_usage: format!(
                "INSERT INTO {} (server_storage_snapshot_id, path, total_bytes, used_bytes, used_percent) \
                 VALUES ($1, $2, $3, $4, $5)",
                tables.mount_path_storage_usage_table
            ),
        })
    }
}

pub struct PgStores {
    client: Client,
    statements: Statements,
    snapshot_table: String,
}

impl PgStores {
    /// Connects and spawns the connection driver on the current runtime
    pub async fn connect(conf: &DatabaseConf) -> Result<Arc<Self>, PersistenceError> {
        let statements = Statements::new(&conf.tables)?;
        let (client, connection) = tokio_postgres::connect(&conf.url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection closed: {e}");
            }
        });
        info!("connected to postgres");

        Ok(Arc::new(Self {
            client,
            statements,
            snapshot_table: conf.tables.server_storage_snapshot_table.clone(),
        }))
    }
}

#[async_trait]
impl AlertStore for PgStores {
    async fn save_alert(&self, alert: &AlertRecord) -> Result<(), PersistenceError> {
        self.client
            .execute(
                &self.statements.insert_alert,
                &[
                    &alert.topic,
                    &alert.server_name,
                    &alert.path,
                    &alert.timestamp,
                    &alert.message,
                ],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgStores {
    async fn save_snapshot(&self, snapshot: &ServerStorageSnapshot) -> Result<SnapshotId, PersistenceError> {
        let collected_at = snapshot
            .instant()
            .map_err(|_| PersistenceError::Timestamp(snapshot.timestamp.clone()))?;

        let row = self
            .client
            .query_opt(
                &self.statements.insert_snapshot,
                &[
                    &snapshot.system_id,
                    &snapshot.system_name,
                    &snapshot.server_ip,
                    &snapshot.server_name,
                    &collected_at,
                ],
            )
            .await?;

        match row {
            Some(row) => Ok(row.try_get::<_, i64>(0)?),
            None => Err(PersistenceError::MissingId {
                table: self.snapshot_table.clone(),
            }),
        }
    }
}

#[async_trait]
impl MountUsageStore for PgStores {
    async fn save_usage(&self, snapshot_id: SnapshotId, usage: &MountPathStorageUsage) -> Result<(), PersistenceError> {
        self.client
            .execute(
                &self.statements.insert_usage,
                &[
                    &snapshot_id,
                    &usage.path,
                    &usage.total_bytes,
                    &usage.used_bytes,
                    &usage.used_percent,
                ],
            )
            .await?;
        Ok(())
    }
}
