//! Symbion ingest: per-topic broker consumers fanning events out to a file
//! mirror, PostgreSQL and a rate-limited Telegram notifier.

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod file_sink;
pub mod handlers;
pub mod models;
pub mod notifier;
pub mod policies;
pub mod pool;
pub mod shutdown;
pub mod sinks;
pub mod state;
pub mod stats;
pub mod supervisor;
pub mod worker;

pub use supervisor::{ShutdownReport, SupervisorSettings, WorkerSupervisor};
