//! Payload types consumed from the broker and the rows derived from them.
//!
//! Field names follow the JSON emitted by the log shippers and storage
//! collectors (camelCase). Timestamps are kept as the raw ISO-8601 string so
//! the METRIC file mirror reproduces the payload; use `instant()` to get the
//! parsed value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingested log line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// Logical source topic carried in the payload (may differ from the broker topic)
    pub topic: String,
    pub timestamp: String,
    pub server_name: String,
    /// Originating file path on the host
    pub path: String,
    pub message: String,
}

impl LogEvent {
    pub fn instant(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        parse_instant(&self.timestamp)
    }
}

/// Point-in-time storage report from one host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStorageSnapshot {
    pub system_id: String,
    pub system_name: String,
    pub server_ip: String,
    pub server_name: String,
    pub timestamp: String,
    #[serde(default)]
    pub mount_path_storage_usages: Vec<MountPathStorageUsage>,
}

impl ServerStorageSnapshot {
    pub fn instant(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        parse_instant(&self.timestamp)
    }
}

/// Usage of one mount path inside a snapshot.
///
/// `used_percent` is informational and never recomputed from the byte counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MountPathStorageUsage {
    pub path: String,
    pub total_bytes: i64,
    pub used_bytes: i64,
    pub used_percent: f64,
}

/// Flattened projection of a [`LogEvent`] that matched an alert keyword
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub server_name: String,
    pub path: String,
    pub message: String,
}

impl AlertRecord {
    pub fn from_event(event: &LogEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            topic: event.topic.clone(),
            timestamp,
            server_name: event.server_name.clone(),
            path: event.path.clone(),
            message: event.message.clone(),
        }
    }
}

/// Parses an ISO-8601 instant (`2024-01-01T00:00:00Z`, offsets allowed)
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}
