/**
 * SYMBION INGEST - Point d'entrée du consommateur de topics
 *
 * RÔLE : Charge la config, ouvre PostgreSQL, construit le notifier Telegram et
 * le broker MQTT, puis lance un worker par topic jusqu'au signal d'arrêt.
 *
 * ARCHITECTURE : broker → TopicWorker → dispatch → {fichier, PostgreSQL, Telegram}
 */

use anyhow::Context;
use std::sync::Arc;
use symbion_ingest::broker::MqttBroker;
use symbion_ingest::config::IngestConfig;
use symbion_ingest::notifier::TelegramTransport;
use symbion_ingest::shutdown::wait_for_shutdown_signal;
use symbion_ingest::sinks::{PgStores, Sinks};
use symbion_ingest::WorkerSupervisor;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "symbion_ingest=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel (secrets Telegram / PostgreSQL)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .init();

    let cfg = IngestConfig::load().await.context("loading configuration")?;
    info!(topics = cfg.topics.len(), keywords = cfg.alert_keywords.len(), "configuration loaded");

    let stores = PgStores::connect(&cfg.database).await.context("connecting to postgres")?;
    let transport = TelegramTransport::new(&cfg.telegram, &cfg.notifier).context("building telegram client")?;
    let broker = MqttBroker::new(cfg.broker.clone());

    let supervisor = WorkerSupervisor::new(
        &cfg,
        Arc::new(broker),
        Sinks::from_backend(stores),
        Arc::new(transport),
    );

    let signal = async {
        if let Err(e) = wait_for_shutdown_signal().await {
            // sans gestionnaire de signaux on tourne jusqu'à la fin des workers
            error!("cannot install signal handlers: {e}");
            std::future::pending::<()>().await;
        }
    };

    match supervisor.run_until(signal).await {
        Ok(report) => {
            info!(persisted = report.stats.persisted, consumed = report.stats.consumed, "shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(label = e.as_label(), "{e}");
            Err(e.into())
        }
    }
}
