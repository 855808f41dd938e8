//! Run statistics
//!
//! In-memory counters produced by a dispatch loop, and ledger-wide
//! statistics loaded from storage for the `stats` command.

use crate::state::ArticleState;
use crate::storage::{RunRecord, Storage, StorageResult};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Failure and throttle rates above this share of started items are flagged
pub const HIGH_RATE_THRESHOLD: f64 = 0.10;

/// Final counters of one or more dispatch loops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Items launched at least once
    pub started: u64,

    /// Launches, including relaunches after transient failures
    pub attempts: u64,

    pub succeeded: u64,
    pub failed_permanently: u64,

    /// Started items handed to escalation by a halt
    pub escalated: u64,

    /// Throttling signals received
    pub rate_limit_hits: u64,

    /// Transient failures other than throttling
    pub other_errors: u64,
}

impl RunStats {
    /// Adds another run's counters to this one
    pub fn merge(&mut self, other: &RunStats) {
        self.started += other.started;
        self.attempts += other.attempts;
        self.succeeded += other.succeeded;
        self.failed_permanently += other.failed_permanently;
        self.escalated += other.escalated;
        self.rate_limit_hits += other.rate_limit_hits;
        self.other_errors += other.other_errors;
    }

    /// Items reached a terminal outcome
    pub fn terminal(&self) -> u64 {
        self.succeeded + self.failed_permanently + self.escalated
    }

    /// Started items without a terminal outcome
    pub fn in_flight(&self) -> u64 {
        self.started.saturating_sub(self.terminal())
    }

    /// Share of started items that failed permanently
    pub fn failure_rate(&self) -> f64 {
        ratio(self.failed_permanently, self.started)
    }

    /// Throttling signals per started item
    pub fn throttle_rate(&self) -> f64 {
        ratio(self.rate_limit_hits, self.started)
    }

    /// Logs the end-of-run summary, warning on high failure or throttle rates
    pub fn log_summary(&self, label: &str, elapsed: Duration) {
        tracing::info!(
            "{}: finished in {:.1}s: {} started, {} succeeded, {} failed, {} escalated, {} attempts",
            label,
            elapsed.as_secs_f64(),
            self.started,
            self.succeeded,
            self.failed_permanently,
            self.escalated,
            self.attempts
        );

        if self.failure_rate() > HIGH_RATE_THRESHOLD {
            tracing::warn!(
                "{}: {} of {} items failed ({:.1}%)",
                label,
                self.failed_permanently,
                self.started,
                self.failure_rate() * 100.0
            );
        }
        if self.throttle_rate() > HIGH_RATE_THRESHOLD {
            tracing::warn!(
                "{}: {} throttling signals for {} items ({:.1}%), consider lowering the limits",
                label,
                self.rate_limit_hits,
                self.started,
                self.throttle_rate() * 100.0
            );
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Ledger-wide statistics
#[derive(Debug, Clone)]
pub struct LedgerStatistics {
    /// Total number of articles in the ledger
    pub total_articles: u64,

    /// Count of articles by state
    pub articles_by_state: HashMap<ArticleState, u64>,

    /// Downloaded articles per site
    pub downloaded_by_site: Vec<(String, u64)>,

    /// The most recent run, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<LedgerStatistics> {
    let mut articles_by_state = HashMap::new();
    for state in ArticleState::all_states() {
        let count = storage.count_by_state(state)?;
        if count > 0 {
            articles_by_state.insert(state, count);
        }
    }

    Ok(LedgerStatistics {
        total_articles: storage.count_total_articles()?,
        articles_by_state,
        downloaded_by_site: storage.count_downloaded_by_site()?,
        latest_run: storage.latest_run()?,
    })
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &LedgerStatistics) {
    println!("=== Harvest Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest run: #{} ({})", run.id, run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!();
    }

    println!("Articles: {}", stats.total_articles);
    let mut state_counts: Vec<_> = stats.articles_by_state.iter().collect();
    state_counts.sort_by(|a, b| b.1.cmp(a.1));
    for (state, count) in state_counts {
        let percentage = ratio(*count, stats.total_articles) * 100.0;
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    if !stats.downloaded_by_site.is_empty() {
        println!("Downloaded by site:");
        for (site, count) in &stats.downloaded_by_site {
            println!("  {}: {}", site, count);
        }
        println!();
    }

    let downloaded = stats
        .articles_by_state
        .get(&ArticleState::Downloaded)
        .copied()
        .unwrap_or(0);
    println!(
        "Success Rate: {:.1}% ({} / {} articles downloaded)",
        ratio(downloaded, stats.total_articles) * 100.0,
        downloaded,
        stats.total_articles
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(started: u64, succeeded: u64, failed: u64, hits: u64) -> RunStats {
        RunStats {
            started,
            attempts: started + hits,
            succeeded,
            failed_permanently: failed,
            escalated: 0,
            rate_limit_hits: hits,
            other_errors: 0,
        }
    }

    #[test]
    fn test_merge_adds_counters() {
        let mut total = stats(10, 8, 2, 1);
        total.merge(&stats(5, 5, 0, 3));

        assert_eq!(total.started, 15);
        assert_eq!(total.succeeded, 13);
        assert_eq!(total.failed_permanently, 2);
        assert_eq!(total.rate_limit_hits, 4);
        assert_eq!(total.attempts, 19);
    }

    #[test]
    fn test_rates() {
        let s = stats(20, 17, 3, 1);
        assert!((s.failure_rate() - 0.15).abs() < 1e-9);
        assert!((s.throttle_rate() - 0.05).abs() < 1e-9);
        assert!(s.failure_rate() > HIGH_RATE_THRESHOLD);
        assert!(s.throttle_rate() < HIGH_RATE_THRESHOLD);
    }

    #[test]
    fn test_rates_with_nothing_started() {
        let s = RunStats::default();
        assert_eq!(s.failure_rate(), 0.0);
        assert_eq!(s.throttle_rate(), 0.0);
        assert_eq!(s.in_flight(), 0);
    }

    #[test]
    fn test_in_flight() {
        let mut s = stats(10, 6, 1, 0);
        s.escalated = 1;
        assert_eq!(s.terminal(), 8);
        assert_eq!(s.in_flight(), 2);
    }
}
