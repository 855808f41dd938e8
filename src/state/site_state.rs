use crate::output::RunStats;
use std::time::Duration;

/// Tracks the outcome of one site's dispatch loop during a crawl
///
/// The coordinator creates one of these per configured site and fills it in
/// once that site's loop has drained.
#[derive(Debug, Clone)]
pub struct SiteState {
    /// Site name from the configuration
    pub name: String,

    /// Number of articles assigned to this site in this run
    pub assigned: usize,

    /// Articles skipped because the ledger already has them downloaded
    pub skipped: usize,

    /// Counters reported by the site's loop
    pub stats: RunStats,

    /// Reason the site's loop halted, if it did
    pub halt_reason: Option<String>,

    /// Wall-clock time the site's loop ran for
    pub elapsed: Duration,
}

impl SiteState {
    /// Creates an empty state for a site
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assigned: 0,
            skipped: 0,
            stats: RunStats::default(),
            halt_reason: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Records the result of the site's loop
    pub fn finish(&mut self, stats: RunStats, halt_reason: Option<String>, elapsed: Duration) {
        self.stats = stats;
        self.halt_reason = halt_reason;
        self.elapsed = elapsed;
    }

    /// Whether the site's loop was halted
    pub fn is_halted(&self) -> bool {
        self.halt_reason.is_some()
    }

    /// Articles assigned to the site that were never started
    pub fn never_started(&self) -> usize {
        self.assigned
            .saturating_sub(self.skipped)
            .saturating_sub(self.stats.started as usize)
    }
}

impl Default for SiteState {
    fn default() -> Self {
        Self::new("")
    }
}
