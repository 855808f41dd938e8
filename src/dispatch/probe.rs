//! Cost probe: calibrate the regulator from a small first run
//!
//! When the real cost of an item is only known after it completes, a short
//! probe run measures it. The average observed completion cost is then added
//! to every remaining item's estimate, and the remainder runs against a fresh
//! regulator seeded with the last remote quota the probe saw.

use crate::dispatch::dispatcher::{
    DispatchSettings, Dispatcher, DispatcherBuilder, EscalationList, HaltSignal, RunReport,
};
use crate::dispatch::regulator::CapacityRegulator;
use crate::dispatch::source::{Prepend, Take, TaskSource};
use crate::dispatch::worker::{Usage, Worker};
use crate::output::{OutcomeSink, RunStats};
use crate::state::Capacity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// What the probe learned about per-item cost
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Mean completion-side cost over the probe
    pub completion_average: f64,

    /// Number of usages the average was computed from
    pub samples: usize,

    /// Last remaining quota reported by the remote side
    pub remaining: Option<Capacity>,

    /// When `remaining` was observed
    pub observed_at: Option<Instant>,
}

/// Computes a calibration from recorded usages
///
/// # Returns
///
/// `None` if no usage was recorded.
pub fn calibrate(usages: &[Usage]) -> Option<Calibration> {
    if usages.is_empty() {
        return None;
    }

    let total: f64 = usages.iter().map(|u| u.completion).sum();
    let last_quota = usages
        .iter()
        .filter(|u| u.remaining.is_some())
        .max_by_key(|u| u.observed_at);

    Some(Calibration {
        completion_average: total / usages.len() as f64,
        samples: usages.len(),
        remaining: last_quota.and_then(|u| u.remaining),
        observed_at: last_quota.map(|u| u.observed_at),
    })
}

/// Builds the regulator used after the probe
///
/// Starts from the reported remaining quota instead of a full bucket when
/// one was observed.
pub fn calibrated_regulator(limits: Capacity, calibration: &Calibration) -> CapacityRegulator {
    let mut regulator = CapacityRegulator::from_per_minute(limits);
    if let (Some(remaining), Some(observed_at)) = (calibration.remaining, calibration.observed_at) {
        regulator.seed_at(remaining, observed_at);
    }
    regulator
}

/// Outcome of a probe run and, if any work was left, the calibrated run
#[derive(Debug, Clone)]
pub struct ProbeReport<P> {
    pub probe: RunReport,
    pub remainder: Option<RunReport>,
    pub calibration: Option<Calibration>,

    /// Items that did not complete in either phase
    pub escalated: Vec<P>,
}

impl<P> ProbeReport<P> {
    /// Counters of both phases combined
    pub fn stats(&self) -> RunStats {
        let mut stats = self.probe.stats.clone();
        if let Some(remainder) = &self.remainder {
            stats.merge(&remainder.stats);
        }
        stats
    }

    /// Total elapsed time of both phases
    pub fn elapsed(&self) -> Duration {
        self.probe.elapsed + self.remainder.as_ref().map_or(Duration::ZERO, |r| r.elapsed)
    }

    /// First halt reason seen in either phase
    pub fn halt_reason(&self) -> Option<&str> {
        self.probe
            .halt_reason
            .as_deref()
            .or_else(|| self.remainder.as_ref().and_then(|r| r.halt_reason.as_deref()))
    }
}

/// Two-phase runner: probe, calibrate, run the rest
pub struct CostProbe<P, W>
where
    P: Send + Sync + 'static,
    W: Worker<P>,
{
    label: String,
    worker: Arc<W>,
    limits: Capacity,
    probe_size: usize,
    settings: DispatchSettings,
    sinks: Vec<Arc<dyn OutcomeSink<P, W::Output>>>,
    halt: HaltSignal,
}

impl<P, W> CostProbe<P, W>
where
    P: Send + Sync + 'static,
    W: Worker<P>,
{
    /// Creates a probe runner
    ///
    /// # Arguments
    ///
    /// * `limits` - Per-minute limits used for both phases
    /// * `probe_size` - Number of items run before calibrating
    pub fn new(label: impl Into<String>, worker: Arc<W>, limits: Capacity, probe_size: usize) -> Self {
        Self {
            label: label.into(),
            worker,
            limits,
            probe_size: probe_size.max(1),
            settings: DispatchSettings::default(),
            sinks: Vec::new(),
            halt: HaltSignal::new(),
        }
    }

    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn OutcomeSink<P, W::Output>>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Uses an existing halt signal for both phases
    pub fn with_halt_signal(mut self, halt: HaltSignal) -> Self {
        self.halt = halt;
        self
    }

    /// Halt signal shared by both phases
    pub fn halt_signal(&self) -> HaltSignal {
        self.halt.clone()
    }

    fn dispatcher(&self, phase: &str, regulator: CapacityRegulator) -> DispatcherBuilder<P, W> {
        let mut builder = Dispatcher::builder(
            format!("{}/{}", self.label, phase),
            Arc::clone(&self.worker),
            regulator,
        )
        .settings(self.settings.clone())
        .halt_signal(self.halt.clone());
        for sink in &self.sinks {
            builder = builder.sink(Arc::clone(sink));
        }
        builder
    }

    /// Runs the probe on the first items of `source`, then the remainder
    pub async fn run<S>(&self, mut source: S) -> ProbeReport<P>
    where
        S: TaskSource<P>,
    {
        let gate = Arc::new(Semaphore::new(self.settings.max_concurrent.max(1)));
        let escalations = EscalationList::new();

        tracing::info!("{}: probing cost with {} item(s)", self.label, self.probe_size);

        let mut probe = self
            .dispatcher("probe", CapacityRegulator::from_per_minute(self.limits))
            .gate(Arc::clone(&gate))
            .escalations(escalations.clone())
            .record_usage(true)
            .build();
        let probe_report = probe.run(Take::new(&mut source, self.probe_size)).await;

        let calibration = calibrate(&probe_report.usages);

        let next = if self.halt.is_halted() {
            None
        } else {
            source.next_task()
        };
        let Some(next) = next else {
            // Either the whole workload fit in the probe or the run halted;
            // a halted run still hands its unpulled items to escalation.
            if self.halt.is_halted() {
                escalations.extend(source.drain_payloads());
            }
            tracing::info!("{}: workload finished within the probe", self.label);
            return ProbeReport {
                probe: probe_report,
                remainder: None,
                calibration,
                escalated: escalations.take(),
            };
        };

        let (regulator, padding) = match &calibration {
            Some(calibration) => {
                tracing::info!(
                    "{}: calibrated from {} sample(s): +{:.1} per item, remaining quota {}",
                    self.label,
                    calibration.samples,
                    calibration.completion_average,
                    calibration
                        .remaining
                        .map_or_else(|| "unknown".to_string(), |c| c.to_string())
                );
                (
                    calibrated_regulator(self.limits, calibration),
                    calibration.completion_average,
                )
            }
            None => {
                tracing::warn!(
                    "{}: probe recorded no usage, running the rest uncalibrated",
                    self.label
                );
                (CapacityRegulator::from_per_minute(self.limits), 0.0)
            }
        };

        let mut remainder = self
            .dispatcher("main", regulator)
            .gate(gate)
            .escalations(escalations.clone())
            .secondary_padding(padding)
            .first_id(probe.next_id())
            .throttled_at(probe.last_throttle())
            .build();
        let remainder_report = remainder.run(Prepend::new(next, &mut source)).await;

        ProbeReport {
            probe: probe_report,
            remainder: Some(remainder_report),
            calibration,
            escalated: escalations.take(),
        }
    }
}
