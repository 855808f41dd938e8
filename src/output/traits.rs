//! Outcome sink trait and summary types
//!
//! This module defines the trait every outcome sink implements and the
//! summary record rendered at the end of a harvest.

use crate::output::RunStats;
use crate::state::{SiteState, WorkItem};
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Malformed log line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Receives every terminal outcome of a dispatch loop
///
/// Sinks are called from concurrently completing units of work, so
/// implementations must be thread-safe. A sink error is logged by the
/// dispatcher and never changes the item's outcome.
pub trait OutcomeSink<P, T>: Send + Sync {
    /// Records an item that completed
    fn record_success(&self, item: &WorkItem<P>, output: &T) -> OutputResult<()>;

    /// Records an item that failed permanently
    ///
    /// `item.errors` holds the message of every failed attempt.
    fn record_failure(&self, item: &WorkItem<P>) -> OutputResult<()>;
}

/// Summary of one harvest run
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    // Run metadata
    pub run_id: Option<i64>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_seconds: Option<u64>,
    pub status: String,
    pub config_hash: String,

    // Input breakdown
    pub total_articles: usize,
    pub unassigned: usize,
    pub skipped: usize,

    /// Items that ended up on the escalation list
    pub escalated: usize,

    /// Per-site outcomes
    pub sites: Vec<SiteState>,
}

impl HarvestSummary {
    /// Creates a new empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of every site combined
    pub fn totals(&self) -> RunStats {
        let mut totals = RunStats::default();
        for site in &self.sites {
            totals.merge(&site.stats);
        }
        totals
    }

    /// Names of the sites whose loop halted
    pub fn halted_sites(&self) -> Vec<&str> {
        self.sites
            .iter()
            .filter(|s| s.is_halted())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Returns the success rate as a percentage of started articles
    pub fn success_rate(&self) -> f64 {
        let totals = self.totals();
        if totals.started == 0 {
            return 0.0;
        }
        (totals.succeeded as f64 / totals.started as f64) * 100.0
    }

    /// Returns the permanent failure rate as a percentage of started articles
    pub fn error_rate(&self) -> f64 {
        self.totals().failure_rate() * 100.0
    }
}
