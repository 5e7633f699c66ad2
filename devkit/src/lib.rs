/*!
# Symbion DevKit - Doublures de test pour symbion-ingest

Permet de faire tourner le pipeline d'ingestion sans broker, sans PostgreSQL
et sans Telegram:
- Broker en mémoire (file par topic, commits et fermetures enregistrés)
- Stores de persistance qui enregistrent chaque ligne
- Transport de notification scriptable
- Constructeurs de payloads LOG / METRIC
- `TestHarness` qui câble le tout dans un `WorkerSupervisor`
*/

pub mod broker_stub;
pub mod payloads;
pub mod sink_stubs;
pub mod test_utils;

pub use broker_stub::MockBroker;
pub use payloads::IngestMessageBuilder;
pub use sink_stubs::{RecordingStores, ScriptedTransport};
pub use test_utils::TestHarness;
