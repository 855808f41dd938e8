//! Token-bucket admission control
//!
//! The regulator accumulates capacity continuously at a fixed rate up to a
//! ceiling and spends it on every admission. Refill depends only on elapsed
//! wall-clock time, never on how many items were admitted.
//!
//! A regulator owned by a single dispatch loop needs no locking. Loops that
//! share one regulator go through [`SharedRegulator`], which performs
//! refill, check and debit as one step under a mutex.

use crate::state::Capacity;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Continuous-refill token bucket over one or two resource dimensions
#[derive(Debug, Clone)]
pub struct CapacityRegulator {
    ceiling: Capacity,
    refill_rate: Capacity,
    available: Capacity,
    last_refill: Instant,
}

impl CapacityRegulator {
    /// Creates a full bucket with the given ceiling and per-second refill rate
    ///
    /// The second dimension is tracked only if the ceiling has one.
    pub fn new(ceiling: Capacity, refill_per_second: Capacity) -> Self {
        let refill_rate = Capacity {
            requests: refill_per_second.requests,
            secondary: ceiling
                .secondary
                .map(|_| refill_per_second.secondary.unwrap_or(0.0)),
        };

        Self {
            ceiling,
            refill_rate,
            available: ceiling,
            last_refill: Instant::now(),
        }
    }

    /// Creates a regulator from per-minute limits
    ///
    /// The ceiling is one minute of quota and the bucket refills at
    /// `limits / 60` units per second.
    pub fn from_per_minute(limits: Capacity) -> Self {
        Self::new(limits, limits.per_second_from_per_minute())
    }

    /// Advances `available` by the time elapsed since the last refill
    pub fn refill(&mut self) {
        self.refill_at(Instant::now());
    }

    /// Advances `available` as if the current time were `now`
    ///
    /// A `now` earlier than the last refill is ignored.
    pub fn refill_at(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.available.requests = (self.available.requests + elapsed * self.refill_rate.requests)
            .min(self.ceiling.requests);

        if let (Some(available), Some(rate), Some(ceiling)) = (
            self.available.secondary,
            self.refill_rate.secondary,
            self.ceiling.secondary,
        ) {
            self.available.secondary = Some((available + elapsed * rate).min(ceiling));
        }

        self.last_refill = now;
    }

    /// Returns true if every tracked dimension can cover `cost`
    ///
    /// A cost larger than the ceiling in some dimension is admitted once
    /// that dimension is full, so such items cannot starve.
    pub fn has_capacity(&self, cost: &Capacity) -> bool {
        let covers = |available: f64, ceiling: f64, needed: f64| {
            available >= needed || available >= ceiling
        };

        if !covers(
            self.available.requests,
            self.ceiling.requests,
            cost.requests,
        ) {
            return false;
        }

        match (self.available.secondary, self.ceiling.secondary) {
            (Some(available), Some(ceiling)) => {
                covers(available, ceiling, cost.secondary.unwrap_or(0.0))
            }
            _ => true,
        }
    }

    /// Subtracts `cost` from every tracked dimension
    ///
    /// The result saturates at zero.
    pub fn debit(&mut self, cost: &Capacity) {
        self.available.requests = (self.available.requests - cost.requests).max(0.0);
        if let Some(available) = self.available.secondary {
            self.available.secondary = Some((available - cost.secondary.unwrap_or(0.0)).max(0.0));
        }
    }

    /// Overwrites `available` directly, clamped to the ceiling
    ///
    /// Used to start from a quota reported by the remote side instead of an
    /// assumed full bucket.
    pub fn seed(&mut self, values: Capacity) {
        self.seed_at(values, Instant::now());
    }

    /// Overwrites `available` with a quota observed at `observed_at`
    ///
    /// Refill resumes from the observation time, so capacity that accrued
    /// since the quota was reported is not lost.
    pub fn seed_at(&mut self, values: Capacity, observed_at: Instant) {
        self.available.requests = values.requests.clamp(0.0, self.ceiling.requests);
        if let Some(ceiling) = self.ceiling.secondary {
            let value = values
                .secondary
                .or(self.available.secondary)
                .unwrap_or(ceiling);
            self.available.secondary = Some(value.clamp(0.0, ceiling));
        }
        self.last_refill = observed_at;
    }

    /// Refills, then admits and debits `cost` if it fits
    pub fn try_admit(&mut self, cost: &Capacity) -> bool {
        self.refill();
        if self.has_capacity(cost) {
            self.debit(cost);
            true
        } else {
            false
        }
    }

    /// Time until `cost` would fit, assuming no other debits
    pub fn time_until(&self, cost: &Capacity) -> Duration {
        if self.has_capacity(cost) {
            return Duration::ZERO;
        }

        let wait = |available: f64, ceiling: f64, needed: f64, rate: f64| {
            let target = needed.min(ceiling);
            if available >= target {
                0.0
            } else if rate <= 0.0 {
                f64::INFINITY
            } else {
                (target - available) / rate
            }
        };

        let mut seconds = wait(
            self.available.requests,
            self.ceiling.requests,
            cost.requests,
            self.refill_rate.requests,
        );

        if let (Some(available), Some(ceiling), Some(rate)) = (
            self.available.secondary,
            self.ceiling.secondary,
            self.refill_rate.secondary,
        ) {
            seconds = seconds.max(wait(
                available,
                ceiling,
                cost.secondary.unwrap_or(0.0),
                rate,
            ));
        }

        if seconds.is_finite() {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::MAX
        }
    }

    /// Currently available capacity
    pub fn available(&self) -> Capacity {
        self.available
    }

    /// Maximum capacity per dimension
    pub fn ceiling(&self) -> Capacity {
        self.ceiling
    }

    /// Refill rate in units per second
    pub fn refill_rate(&self) -> Capacity {
        self.refill_rate
    }
}

/// A regulator shared between several dispatch loops
///
/// Every admission runs refill, check and debit under one lock so
/// concurrent loops cannot over-admit.
#[derive(Debug, Clone)]
pub struct SharedRegulator {
    inner: Arc<Mutex<CapacityRegulator>>,
}

impl SharedRegulator {
    /// Wraps a regulator for shared use
    pub fn new(regulator: CapacityRegulator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(regulator)),
        }
    }

    /// Atomically refills, checks and debits
    pub fn try_admit(&self, cost: &Capacity) -> bool {
        self.inner.lock().try_admit(cost)
    }

    /// Waits until `cost` has been admitted
    pub async fn admit(&self, cost: &Capacity) {
        loop {
            let wait = {
                let mut regulator = self.inner.lock();
                if regulator.try_admit(cost) {
                    return;
                }
                regulator.time_until(cost)
            };
            tokio::time::sleep(wait.clamp(Duration::from_millis(1), Duration::from_secs(1))).await;
        }
    }

    /// Overwrites the available capacity
    pub fn seed(&self, values: Capacity) {
        self.inner.lock().seed(values);
    }

    /// Currently available capacity (without refilling)
    pub fn available(&self) -> Capacity {
        self.inner.lock().available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regulator() -> CapacityRegulator {
        CapacityRegulator::from_per_minute(Capacity::with_secondary(60.0, 6000.0))
    }

    #[test]
    fn test_starts_full() {
        let regulator = regulator();
        assert_eq!(regulator.available(), regulator.ceiling());
    }

    #[test]
    fn test_secondary_rate_ignored_without_secondary_ceiling() {
        let regulator = CapacityRegulator::new(
            Capacity::requests(10.0),
            Capacity::with_secondary(1.0, 100.0),
        );
        assert_eq!(regulator.refill_rate().secondary, None);
        assert!(regulator.has_capacity(&Capacity::single_request(1_000_000.0)));
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut regulator = regulator();
        for _ in 0..200 {
            regulator.debit(&Capacity::single_request(500.0));
            let available = regulator.available();
            assert!(available.requests >= 0.0);
            assert!(available.secondary.unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_refill_is_continuous_and_clamped() {
        let mut regulator = regulator();
        let start = Instant::now();
        regulator.seed_at(Capacity::with_secondary(0.0, 0.0), start);

        regulator.refill_at(start + Duration::from_millis(500));
        let available = regulator.available();
        assert!((available.requests - 0.5).abs() < 1e-9);
        assert!((available.secondary.unwrap() - 50.0).abs() < 1e-6);

        regulator.refill_at(start + Duration::from_secs(3600));
        assert_eq!(regulator.available(), regulator.ceiling());
    }

    #[test]
    fn test_refill_ignores_time_going_backwards() {
        let mut regulator = regulator();
        let start = Instant::now();
        regulator.seed_at(Capacity::with_secondary(1.0, 100.0), start + Duration::from_secs(1));
        regulator.refill_at(start);
        assert_eq!(regulator.available().requests, 1.0);
    }

    #[test]
    fn test_has_capacity_checks_every_dimension() {
        let mut regulator = regulator();
        regulator.seed(Capacity::with_secondary(5.0, 100.0));

        assert!(regulator.has_capacity(&Capacity::single_request(100.0)));
        assert!(!regulator.has_capacity(&Capacity::single_request(101.0)));
        assert!(!regulator.has_capacity(&Capacity::with_secondary(6.0, 1.0)));
    }

    #[test]
    fn test_oversized_cost_admitted_when_full() {
        let mut regulator = CapacityRegulator::from_per_minute(Capacity::with_secondary(10.0, 100.0));
        let huge = Capacity::single_request(1_000.0);

        assert!(regulator.has_capacity(&huge));
        regulator.debit(&huge);
        assert_eq!(regulator.available().secondary, Some(0.0));
        assert!(!regulator.has_capacity(&huge));
    }

    #[test]
    fn test_seed_clamps_to_ceiling() {
        let mut regulator = regulator();
        regulator.seed(Capacity::with_secondary(1_000.0, -5.0));
        assert_eq!(regulator.available(), Capacity::with_secondary(60.0, 0.0));
    }

    #[test]
    fn test_seed_keeps_secondary_when_not_reported() {
        let mut regulator = regulator();
        regulator.debit(&Capacity::single_request(1000.0));
        regulator.seed(Capacity::requests(10.0));
        assert_eq!(regulator.available(), Capacity::with_secondary(10.0, 5000.0));
    }

    #[test]
    fn test_time_until() {
        let mut regulator = regulator();
        let now = Instant::now();
        regulator.seed_at(Capacity::with_secondary(0.0, 6000.0), now);

        let wait = regulator.time_until(&Capacity::single_request(10.0));
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-6);

        regulator.seed_at(Capacity::with_secondary(5.0, 0.0), now);
        let wait = regulator.time_until(&Capacity::single_request(200.0));
        assert!((wait.as_secs_f64() - 2.0).abs() < 1e-6);

        regulator.seed_at(Capacity::with_secondary(5.0, 6000.0), now);
        assert_eq!(
            regulator.time_until(&Capacity::single_request(1.0)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_try_admit() {
        let mut regulator = CapacityRegulator::new(Capacity::requests(2.0), Capacity::requests(0.0));
        assert!(regulator.try_admit(&Capacity::requests(1.0)));
        assert!(regulator.try_admit(&Capacity::requests(1.0)));
        assert!(!regulator.try_admit(&Capacity::requests(1.0)));
    }

    #[tokio::test]
    async fn test_shared_regulator_never_over_admits() {
        let shared = SharedRegulator::new(CapacityRegulator::new(
            Capacity::requests(50.0),
            Capacity::requests(0.0),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                let mut admitted = 0;
                for _ in 0..20 {
                    if shared.try_admit(&Capacity::requests(1.0)) {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 50);
        assert_eq!(shared.available().requests, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_regulator_admit_waits_for_refill() {
        let shared = SharedRegulator::new(CapacityRegulator::from_per_minute(Capacity::requests(
            60.0,
        )));
        shared.seed(Capacity::requests(0.0));

        let start = Instant::now();
        shared.admit(&Capacity::requests(1.0)).await;
        assert!(start.elapsed() >= Duration::from_millis(990));
    }
}
