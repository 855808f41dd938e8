//! Append-only JSONL outcome log
//!
//! Every terminal outcome becomes one line:
//! `{"request": ..., "response": ..., "metadata": ..., "errors": [...]}`.
//! Failed items carry the string `"Failed"` as their response so a later
//! pass can pick them out again.

use crate::output::traits::{OutcomeSink, OutputError, OutputResult};
use crate::state::WorkItem;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Response value written for items that failed permanently
pub const FAILED_SENTINEL: &str = "Failed";

/// A payload that can be written to the outcome log
pub trait LogEntry {
    /// The request as it should appear in the log
    fn request(&self) -> Value;

    /// Caller metadata correlating the record back to its source
    fn metadata(&self) -> Option<Value> {
        None
    }
}

/// One line of the outcome log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub request: Value,
    pub response: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl OutcomeRecord {
    /// Builds the record of a completed item
    pub fn success<P: LogEntry>(payload: &P, response: Value) -> Self {
        Self {
            request: payload.request(),
            response,
            metadata: payload.metadata(),
            errors: Vec::new(),
        }
    }

    /// Builds the record of a failed item
    pub fn failure<P: LogEntry>(payload: &P, errors: &[String]) -> Self {
        Self {
            request: payload.request(),
            response: Value::String(FAILED_SENTINEL.to_string()),
            metadata: payload.metadata(),
            errors: errors.to_vec(),
        }
    }

    /// Whether this record marks a failed item
    pub fn is_failed(&self) -> bool {
        self.response.as_str() == Some(FAILED_SENTINEL)
    }
}

/// Outcome sink writing one JSON object per line, flushed per line
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Creates (or truncates) the log at `path`
    pub fn create(path: &Path) -> OutputResult<Self> {
        Self::open(path, false)
    }

    /// Opens the log at `path` for appending, creating it if needed
    pub fn append(path: &Path) -> OutputResult<Self> {
        Self::open(path, true)
    }

    fn open(path: &Path, append: bool) -> OutputResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and flushes it
    pub fn write_record(&self, record: &OutcomeRecord) -> OutputResult<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer
            .flush()
            .map_err(|e| OutputError::Write(format!("{}: {}", self.path.display(), e)))
    }
}

impl<P, T> OutcomeSink<P, T> for JsonlSink
where
    P: LogEntry,
    T: Serialize,
{
    fn record_success(&self, item: &WorkItem<P>, output: &T) -> OutputResult<()> {
        let response = serde_json::to_value(output)?;
        self.write_record(&OutcomeRecord::success(&item.payload, response))
    }

    fn record_failure(&self, item: &WorkItem<P>) -> OutputResult<()> {
        self.write_record(&OutcomeRecord::failure(&item.payload, &item.errors))
    }
}
