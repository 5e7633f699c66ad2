/*!
Test Harness pour symbion-ingest

Câble un `WorkerSupervisor` sur les doublures du devkit:
- broker en mémoire, stores enregistreurs, transport scriptable
- fichiers de sortie dans un répertoire temporaire
- config de test avec des délais courts
*/

use crate::broker_stub::MockBroker;
use crate::sink_stubs::{RecordingStores, ScriptedTransport};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use symbion_ingest::config::{IngestConfig, TopicConf};
use symbion_ingest::dispatch::RecordType;
use symbion_ingest::sinks::Sinks;
use symbion_ingest::WorkerSupervisor;
use tempfile::TempDir;

const BASE_CONFIG: &str = r#"
telegram:
  bot_token: test-token
  chat_id: "42"
alert_keywords: [failure]
database:
  url: "host=localhost"
  tables:
    alert_log_table: alert_log
    server_storage_snapshot_table: server_storage_snapshot
    mount_path_storage_usage_table: mount_path_storage_usage
topics: []
pipeline:
  poll_timeout_ms: 50
  reconnect_delay_ms: 50
  shutdown_grace_secs: 2
notifier:
  min_interval_ms: 50
  retry_backoff_ms: 10
"#;

/// Harness de test complet pour le pipeline d'ingestion
pub struct TestHarness {
    pub broker: MockBroker,
    pub stores: Arc<RecordingStores>,
    pub transport: Arc<ScriptedTransport>,
    pub config: IngestConfig,
    dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        Ok(Self {
            broker: MockBroker::new(),
            stores: Arc::new(RecordingStores::new()),
            transport: Arc::new(ScriptedTransport::new()),
            config: IngestConfig::from_yaml(BASE_CONFIG)?,
            dir: tempfile::tempdir()?,
        })
    }

    /// Ajoute un topic; son fichier de sortie est créé si `create_output`
    pub fn with_topic(mut self, topic: &str, record_type: &str, create_output: bool) -> Result<Self> {
        let output = self.output_path(topic);
        if create_output {
            std::fs::File::create(&output)?;
        }
        self.config.topics.push(TopicConf {
            topic: topic.to_string(),
            record_type: RecordType::from(record_type.to_string()),
            output,
        });
        Ok(self)
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.config.alert_keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Modifie la config avant construction du superviseur
    pub fn configure(mut self, f: impl FnOnce(&mut IngestConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn supervisor(&self) -> Result<WorkerSupervisor> {
        self.config.validate()?;
        Ok(WorkerSupervisor::new(
            &self.config,
            Arc::new(self.broker.clone()),
            Sinks::from_backend(self.stores.clone()),
            self.transport.clone(),
        ))
    }

    pub fn output_path(&self, topic: &str) -> PathBuf {
        self.dir.path().join(format!("{topic}.out"))
    }

    /// Contenu du fichier de sortie (vide s'il n'existe pas)
    pub fn read_output(&self, topic: &str) -> String {
        std::fs::read_to_string(self.output_path(topic)).unwrap_or_default()
    }

    pub fn feed_json(&self, topic: &str, value: &serde_json::Value) {
        self.broker.feed(topic, value.to_string().into_bytes());
    }

    /// Attend que `condition` soit vraie, au plus `timeout_ms`
    pub async fn wait_until<F>(&self, timeout_ms: u64, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        log::warn!("⏰ condition not met within {}ms", timeout_ms);
        condition()
    }
}
