//! Append-only mirror of consumed events into a human-readable file.
//!
//! The sink never creates its target: a missing file is reported once and
//! writes are skipped until the file appears. Every write is flushed before
//! returning.

use crate::error::FileSinkError;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[cfg(windows)]
pub const LINE_SEPARATOR: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_SEPARATOR: &str = "\n";

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats an instant as `YYYY-MM-DD HH:mm:ss` in the process local time zone
pub fn format_local(ts: &DateTime<Utc>) -> String {
    format_in(ts, &Local)
}

pub fn format_in<Tz: TimeZone>(ts: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    ts.with_timezone(tz).format(DISPLAY_FORMAT).to_string()
}

pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

/// What happened to one write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Target missing; nothing written
    Skipped,
}

impl FileSink {
    /// Binds the sink to `path`, warning once if it does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !target_exists(&path).await {
            warn!(
                path = %path.display(),
                "output file does not exist; create it manually, writes are skipped until then"
            );
        }
        Self { path, file: None }
    }

    /// Appends `line` followed by the line separator
    pub async fn append_line(&mut self, line: &str) -> Result<WriteOutcome, FileSinkError> {
        let mut buf = String::with_capacity(line.len() + LINE_SEPARATOR.len());
        buf.push_str(line);
        buf.push_str(LINE_SEPARATOR);
        self.write_flushed(buf.as_bytes()).await
    }

    /// Appends `value` as pretty-printed JSON followed by the line separator
    pub async fn append_pretty<T: Serialize>(&mut self, value: &T) -> Result<WriteOutcome, FileSinkError> {
        let mut block = serde_json::to_string_pretty(value)?;
        block.push_str(LINE_SEPARATOR);
        self.write_flushed(block.as_bytes()).await
    }

    async fn write_flushed(&mut self, bytes: &[u8]) -> Result<WriteOutcome, FileSinkError> {
        if !target_exists(&self.path).await {
            // Removed (or never created): drop the stale handle so a new file is picked up.
            self.file = None;
            debug!(path = %self.path.display(), "output file missing, write skipped");
            return Ok(WriteOutcome::Skipped);
        }

        if self.file.is_none() {
            let file = OpenOptions::new()
                .append(true)
                .open(&self.path)
                .await
                .map_err(|source| FileSinkError::Open {
                    path: self.path.display().to_string(),
                    source,
                })?;
            self.file = Some(file);
        }

        let path = self.path.display().to_string();
        let Some(file) = self.file.as_mut() else {
            return Ok(WriteOutcome::Skipped);
        };
        let res = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        match res {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(source) => {
                self.file = None;
                Err(FileSinkError::Write { path, source })
            }
        }
    }
}

async fn target_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
