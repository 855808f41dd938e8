//! Output module for outcome logs, escalations and run summaries
//!
//! This module handles:
//! - The append-only JSONL outcome log and reading it back
//! - Writing the escalation file
//! - Run statistics and markdown summaries

mod escalation;
mod markdown;
pub mod replay;
mod sink;
pub mod stats;
mod traits;

pub use escalation::write_escalations;
pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use sink::{JsonlSink, LogEntry, OutcomeRecord, FAILED_SENTINEL};
pub use stats::{load_statistics, print_statistics, LedgerStatistics, RunStats};
pub use traits::{HarvestSummary, OutcomeSink, OutputError, OutputResult};
