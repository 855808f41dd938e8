//! Status counters for a single dispatch loop
//!
//! The tracker is mutated by the loop when it admits work and by finished
//! units of work when they report an outcome. It is always accessed behind a
//! mutex owned by the dispatcher.

use crate::output::RunStats;
use std::time::Duration;
use tokio::time::Instant;

/// Mutable counters describing the progress of one dispatch loop
///
/// `in_flight` counts items that were started and have not reached a
/// terminal outcome yet, including items waiting in the retry queue.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    started: u64,
    in_flight: u64,
    attempts: u64,
    succeeded: u64,
    failed_permanently: u64,
    escalated: u64,
    rate_limit_hits: u64,
    other_errors: u64,
    last_rate_limit_error_at: Option<Instant>,
}

impl StatusTracker {
    /// Creates a tracker with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that an item was launched
    ///
    /// Only the first launch of an item counts as a start; relaunches after
    /// a transient failure only count as attempts.
    pub fn record_launch(&mut self, first_attempt: bool) {
        self.attempts += 1;
        if first_attempt {
            self.started += 1;
            self.in_flight += 1;
        }
    }

    /// Records a terminal success
    pub fn record_success(&mut self) {
        self.succeeded += 1;
        self.finish_one();
    }

    /// Records a transient failure
    ///
    /// Throttling failures additionally open the shared cool-down window.
    pub fn record_transient(&mut self, throttled: bool, now: Instant) {
        if throttled {
            self.rate_limit_hits += 1;
            self.last_rate_limit_error_at = Some(now);
        } else {
            self.other_errors += 1;
        }
    }

    /// Records an item that ran out of attempts or failed fatally
    pub fn record_permanent(&mut self) {
        self.failed_permanently += 1;
        self.finish_one();
    }

    /// Records a started item handed off to escalation by a halt
    pub fn record_escalated(&mut self) {
        self.escalated += 1;
        self.finish_one();
    }

    fn finish_one(&mut self) {
        debug_assert!(self.in_flight > 0, "terminal outcome without a start");
        self.in_flight = self.in_flight.saturating_sub(1);
        debug_assert_eq!(
            self.in_flight,
            self.started - self.succeeded - self.failed_permanently - self.escalated
        );
    }

    /// Number of started items without a terminal outcome
    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    /// Number of items that reached a terminal outcome
    pub fn terminal(&self) -> u64 {
        self.succeeded + self.failed_permanently + self.escalated
    }

    /// Timestamp of the most recent throttling signal, if any
    pub fn last_rate_limit_error_at(&self) -> Option<Instant> {
        self.last_rate_limit_error_at
    }

    /// Carries a throttling signal observed elsewhere into this tracker
    ///
    /// Counters are untouched; only the cool-down window moves, and never
    /// backwards.
    pub fn seed_rate_limit_error_at(&mut self, at: Instant) {
        if self.last_rate_limit_error_at.map_or(true, |last| last < at) {
            self.last_rate_limit_error_at = Some(at);
        }
    }

    /// Time left in the cool-down window opened by the last throttling signal
    ///
    /// Returns `None` when no cool-down is active.
    pub fn cooldown_remaining(&self, pause: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_rate_limit_error_at?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < pause {
            Some(pause - elapsed)
        } else {
            None
        }
    }

    /// Copies the counters into a plain statistics record
    pub fn snapshot(&self) -> RunStats {
        RunStats {
            started: self.started,
            attempts: self.attempts,
            succeeded: self.succeeded,
            failed_permanently: self.failed_permanently,
            escalated: self.escalated,
            rate_limit_hits: self.rate_limit_hits,
            other_errors: self.other_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker() {
        let tracker = StatusTracker::new();
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.terminal(), 0);
        assert!(tracker.last_rate_limit_error_at().is_none());
    }

    #[test]
    fn test_seeded_throttle_opens_cooldown_and_never_moves_back() {
        let mut tracker = StatusTracker::new();
        let now = Instant::now();
        let later = now + Duration::from_secs(5);

        tracker.seed_rate_limit_error_at(later);
        tracker.seed_rate_limit_error_at(now);
        assert_eq!(tracker.last_rate_limit_error_at(), Some(later));
        assert_eq!(tracker.snapshot().rate_limit_hits, 0);

        let pause = Duration::from_secs(15);
        assert_eq!(
            tracker.cooldown_remaining(pause, later + Duration::from_secs(10)),
            Some(Duration::from_secs(5))
        );
        assert_eq!(tracker.cooldown_remaining(pause, later + pause), None);
    }

    #[test]
    fn test_relaunch_does_not_count_as_start() {
        let mut tracker = StatusTracker::new();
        tracker.record_launch(true);
        tracker.record_launch(false);
        tracker.record_launch(false);

        let stats = tracker.snapshot();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.attempts, 3);
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn test_in_flight_conservation() {
        let mut tracker = StatusTracker::new();
        for _ in 0..5 {
            tracker.record_launch(true);
        }
        tracker.record_success();
        tracker.record_success();
        tracker.record_permanent();
        tracker.record_escalated();

        let stats = tracker.snapshot();
        assert_eq!(tracker.in_flight(), 1);
        assert_eq!(
            tracker.in_flight(),
            stats.started - stats.succeeded - stats.failed_permanently - stats.escalated
        );
    }

    #[test]
    fn test_throttle_opens_cooldown() {
        let mut tracker = StatusTracker::new();
        let now = Instant::now();
        let pause = Duration::from_secs(15);

        tracker.record_transient(false, now);
        assert!(tracker.cooldown_remaining(pause, now).is_none());

        tracker.record_transient(true, now);
        assert_eq!(tracker.cooldown_remaining(pause, now), Some(pause));

        let later = now + Duration::from_secs(10);
        assert_eq!(
            tracker.cooldown_remaining(pause, later),
            Some(Duration::from_secs(5))
        );

        let after = now + Duration::from_secs(16);
        assert!(tracker.cooldown_remaining(pause, after).is_none());

        let stats = tracker.snapshot();
        assert_eq!(stats.rate_limit_hits, 1);
        assert_eq!(stats.other_errors, 1);
    }
}
