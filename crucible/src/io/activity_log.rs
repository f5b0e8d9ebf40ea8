//! Product activity log (`.crucible/activity.jsonl`).
//!
//! Unlike `tracing` output this is always written, one JSON object per line,
//! independent of `RUST_LOG`. A failed append is reported via `warn!` and never
//! interrupts the pipeline.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// One activity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Unit the entry concerns, e.g. `m01/p02`.
    pub context: String,
    /// Step within the unit, e.g. `draft`, `challenge`, `transition`.
    pub phase: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl LogEntry {
    pub fn new(context: &str, phase: &str, message: impl Into<String>) -> Self {
        Self {
            context: context.to_string(),
            phase: phase.to_string(),
            message: message.into(),
            attempt: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

pub trait Logger {
    fn log(&self, entry: &LogEntry);
}

#[derive(Serialize)]
struct Line<'a> {
    at: String,
    #[serde(flatten)]
    entry: &'a LogEntry,
}

/// Appends entries to a JSONL file and mirrors them to `tracing`.
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = Line {
            at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            entry,
        };
        let mut buf = serde_json::to_string(&line)?;
        buf.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf.as_bytes())
    }
}

impl Logger for ActivityLog {
    fn log(&self, entry: &LogEntry) {
        info!(
            context = %entry.context,
            phase = %entry.phase,
            attempt = ?entry.attempt,
            "{}",
            entry.message
        );
        if let Err(err) = self.append(entry) {
            warn!(path = %self.path.display(), err = %err, "failed to append activity log");
        }
    }
}
