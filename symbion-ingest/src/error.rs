//! Error taxonomy of the ingest pipeline.
//!
//! Only [`DispatchError`] ever reaches the poll loop; every other error is
//! local to one message's side effects and ends its life as a log line.
//! Each enum exposes `as_label()` for structured logging.

use std::time::Duration;
use thiserror::Error;

/// Failure to turn a raw payload into a typed record.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid timestamp {raw:?}: {source}")]
    Timestamp {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Outcome of the record dispatcher when it refuses a message.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("unsupported record type: {0}")]
    UnsupportedType(String),
}

impl DispatchError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Decode(_) => "decode_error",
            DispatchError::UnsupportedType(_) => "unsupported_type",
        }
    }
}

/// Errors of the broker adapter. Never fatal to a worker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("commit failed: {0}")]
    Commit(String),
}

impl BrokerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Subscribe { .. } => "broker_subscribe",
            BrokerError::Connection(_) => "broker_connection",
            BrokerError::Commit(_) => "broker_commit",
        }
    }
}

#[derive(Error, Debug)]
pub enum FileSinkError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("write to {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("invalid table name: {0:?}")]
    InvalidTable(String),
    #[error("no generated identifier returned for {table}")]
    MissingId { table: String },
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    pub fn as_label(&self) -> &'static str {
        match self {
            PersistenceError::Database(_) => "db_error",
            PersistenceError::InvalidTable(_) => "db_invalid_table",
            PersistenceError::MissingId { .. } => "db_missing_id",
            PersistenceError::Timestamp(_) => "db_timestamp",
            PersistenceError::Unavailable(_) => "db_unavailable",
        }
    }
}

/// Failure of one delivery attempt to the notification channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },
    #[error("invalid request: {0}")]
    Request(String),
}

impl NotifyError {
    /// Timeouts and transient transport/server failures are retried; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Timeout(_) | NotifyError::Transient(_))
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            NotifyError::Timeout(_) => "notify_timeout",
            NotifyError::Transient(_) => "notify_transient",
            NotifyError::Rejected { .. } => "notify_rejected",
            NotifyError::Request(_) => "notify_request",
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
    #[error("pool {pool} is closed, task {task} rejected")]
    Closed { pool: String, task: &'static str },
}

/// Conditions that stop a topic worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("topic {topic}: {source}")]
    Dispatch {
        topic: String,
        #[source]
        source: DispatchError,
    },
    #[error("topic {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BrokerError,
    },
}

impl WorkerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Dispatch { source, .. } => source.as_label(),
            WorkerError::Subscribe { source, .. } => source.as_label(),
        }
    }
}

/// Errors raised by the supervisor itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded { grace: Duration, stuck: Vec<String> },
}

impl RuntimeError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
