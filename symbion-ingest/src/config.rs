//! Process configuration (YAML), with secret overrides from the environment.
//!
//! ```yaml
//! broker: { host: localhost, port: 1883 }
//! telegram: { bot_token: "...", chat_id: "..." }
//! alert_keywords: [error, failure]
//! database:
//!   url: "host=localhost user=ingest dbname=monitoring"
//!   tables:
//!     alert_log_table: alert_log
//!     server_storage_snapshot_table: server_storage_snapshot
//!     mount_path_storage_usage_table: mount_path_storage_usage
//! topics:
//!   - { topic: app-logs, type: LOG, output: /var/log/ingest/app.log }
//!   - { topic: storage, type: METRIC, output: /var/log/ingest/storage.json }
//! ```

use crate::dispatch::RecordType;
use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, FailurePolicy, RestartPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "SYMBION_INGEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/ingest.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub broker: BrokerConf,
    pub telegram: TelegramConf,
    #[serde(default)]
    pub alert_keywords: Vec<String>,
    pub database: DatabaseConf,
    pub topics: Vec<TopicConf>,
    #[serde(default)]
    pub pipeline: PipelineConf,
    #[serde(default)]
    pub notifier: NotifierConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for BrokerConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id_prefix: default_client_prefix(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConf {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConf {
    /// libpq-style connection string
    #[serde(default)]
    pub url: String,
    pub tables: TableConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConf {
    pub alert_log_table: String,
    pub server_storage_snapshot_table: String,
    pub mount_path_storage_usage_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConf {
    pub topic: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConf {
    pub poll_timeout_ms: u64,
    pub persistence_workers: usize,
    pub shutdown_grace_secs: u64,
    pub reconnect_delay_ms: u64,
    pub failure_policy: FailurePolicy,
    pub restart: RestartConf,
}

impl Default for PipelineConf {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 500,
            persistence_workers: 3,
            shutdown_grace_secs: 5,
            reconnect_delay_ms: 2000,
            failure_policy: FailurePolicy::default(),
            restart: RestartConf::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConf {
    pub policy: RestartPolicy,
    pub first_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub factor: f64,
}

impl Default for RestartConf {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::Never,
            first_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            factor: 2.0,
        }
    }
}

impl RestartConf {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(self.first_backoff_ms),
            max: Duration::from_millis(self.max_backoff_ms),
            factor: self.factor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConf {
    pub min_interval_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for NotifierConf {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            request_timeout_secs: 7,
        }
    }
}

fn default_client_prefix() -> String {
    "symbion-ingest".into()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

impl IngestConfig {
    /// Loads the config from `SYMBION_INGEST_CONFIG` (or the default path)
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let txt = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        let mut cfg = Self::from_yaml(&txt)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(txt)?)
    }

    /// Secrets may be kept out of the file (`.env` is loaded by the binary)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("SYMBION_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Ok(chat) = std::env::var("SYMBION_TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat;
        }
        if let Ok(url) = std::env::var("SYMBION_DATABASE_URL") {
            self.database.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topics.is_empty() {
            return Err(ConfigError::Invalid("no topics configured".into()));
        }
        let mut seen = HashSet::new();
        for t in &self.topics {
            if t.topic.trim().is_empty() {
                return Err(ConfigError::Invalid("empty topic name".into()));
            }
            if !seen.insert(t.topic.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate topic {}", t.topic)));
            }
        }
        let tables = &self.database.tables;
        for name in [
            &tables.alert_log_table,
            &tables.server_storage_snapshot_table,
            &tables.mount_path_storage_usage_table,
        ] {
            if !is_valid_table_name(name) {
                return Err(ConfigError::Invalid(format!("invalid table name {name:?}")));
            }
        }
        if self.pipeline.persistence_workers == 0 {
            return Err(ConfigError::Invalid("persistence_workers must be >= 1".into()));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.poll_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.pipeline.shutdown_grace_secs)
    }
}

/// Table names are interpolated into SQL, so only `[A-Za-z0-9_.]` is accepted
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
