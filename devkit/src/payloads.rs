/*!
Constructeurs de payloads au format consommé par symbion-ingest
*/

use serde_json::{json, Value};

pub struct IngestMessageBuilder;

impl IngestMessageBuilder {
    /// Payload LOG
    pub fn log_event(topic: &str, timestamp: &str, server: &str, path: &str, message: &str) -> Value {
        json!({
            "topic": topic,
            "timestamp": timestamp,
            "serverName": server,
            "path": path,
            "message": message
        })
    }

    /// Payload LOG horodaté maintenant
    pub fn log_now(topic: &str, server: &str, message: &str) -> Value {
        Self::log_event(
            topic,
            &chrono::Utc::now().to_rfc3339(),
            server,
            "/var/log/app.log",
            message,
        )
    }

    /// Payload METRIC avec une entrée par `(path, total, used)`
    pub fn storage_snapshot(server: &str, timestamp: &str, mounts: &[(&str, i64, i64)]) -> Value {
        let usages: Vec<Value> = mounts
            .iter()
            .map(|(path, total, used)| {
                let pct = if *total > 0 { *used as f64 * 100.0 / *total as f64 } else { 0.0 };
                json!({
                    "path": path,
                    "totalBytes": total,
                    "usedBytes": used,
                    "usedPercent": pct
                })
            })
            .collect();

        json!({
            "systemId": "sys-001",
            "systemName": "billing",
            "serverIp": "10.0.0.12",
            "serverName": server,
            "timestamp": timestamp,
            "mountPathStorageUsages": usages
        })
    }
}
