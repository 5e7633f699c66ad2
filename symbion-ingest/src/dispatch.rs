//! Record dispatcher: decodes a raw payload according to the topic's configured
//! record type. Performs no side effects of its own.

use crate::error::{DecodeError, DispatchError};
use crate::models::{LogEvent, ServerStorageSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statically configured interpretation of every message on a topic.
///
/// Unknown names are kept rather than rejected at load time so that the
/// affected worker fails on its first message while the others keep running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordType {
    Log,
    Metric,
    Unsupported(String),
}

impl From<String> for RecordType {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOG" => RecordType::Log,
            "METRIC" => RecordType::Metric,
            _ => RecordType::Unsupported(raw),
        }
    }
}

impl From<RecordType> for String {
    fn from(rt: RecordType) -> Self {
        rt.to_string()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Log => f.write_str("LOG"),
            RecordType::Metric => f.write_str("METRIC"),
            RecordType::Unsupported(name) => f.write_str(name),
        }
    }
}

/// A decoded message along with its parsed timestamp
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Log {
        event: LogEvent,
        at: DateTime<Utc>,
    },
    Metric {
        snapshot: ServerStorageSnapshot,
        at: DateTime<Utc>,
    },
}

/// Decodes `payload` as the given record type.
///
/// Timestamps are validated here: a payload whose `timestamp` is not a valid
/// instant is a decode error, same as malformed JSON.
pub fn decode(record_type: &RecordType, payload: &[u8]) -> Result<Record, DispatchError> {
    match record_type {
        RecordType::Log => {
            let event: LogEvent = serde_json::from_slice(payload).map_err(DecodeError::from)?;
            let at = event.instant().map_err(|source| DecodeError::Timestamp {
                raw: event.timestamp.clone(),
                source,
            })?;
            Ok(Record::Log { event, at })
        }
        RecordType::Metric => {
            let snapshot: ServerStorageSnapshot =
                serde_json::from_slice(payload).map_err(DecodeError::from)?;
            let at = snapshot.instant().map_err(|source| DecodeError::Timestamp {
                raw: snapshot.timestamp.clone(),
                source,
            })?;
            Ok(Record::Metric { snapshot, at })
        }
        RecordType::Unsupported(name) => Err(DispatchError::UnsupportedType(name.clone())),
    }
}
