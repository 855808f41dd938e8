//! The dispatch loop
//!
//! One loop owns one regulator and one retry queue. Each tick it stages an
//! item (retry queue first, then the task source), refills the regulator and
//! launches the staged item as a detached task if capacity allows. Launched
//! tasks report exactly one outcome back through the shared state; the loop
//! finishes once the source is exhausted and no started item is left
//! without a terminal outcome.

use crate::config::{DispatchConfig, MAX_COOLDOWN_SECONDS};
use crate::dispatch::regulator::CapacityRegulator;
use crate::dispatch::retry::RetryQueue;
use crate::dispatch::source::{Task, TaskSource};
use crate::dispatch::worker::{Attempt, FailureKind, Usage, Worker};
use crate::output::{OutcomeSink, RunStats};
use crate::state::{StatusTracker, WorkItem};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Number of terminal outcomes between progress log lines
const PROGRESS_EVERY: u64 = 50;

/// Tunables for one dispatch loop
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Failed attempts after which an item is given up on
    pub max_redo: u32,

    /// Pause after a throttling signal
    pub cooldown: Duration,

    /// Yield between ticks when nothing could be launched
    pub tick: Duration,

    /// Size of the concurrency gate created when none is supplied
    pub max_concurrent: usize,

    /// Ceiling on running tasks of this loop, enforced at admission
    pub max_in_flight: Option<usize>,
}

impl DispatchSettings {
    /// Builds settings from the `[dispatch]` configuration table
    ///
    /// The cool-down is clamped to the range validation accepts; a value
    /// that is not a number means no cool-down.
    pub fn from_config(config: &DispatchConfig) -> Self {
        let cooldown = config.cooldown_seconds.clamp(0.0, MAX_COOLDOWN_SECONDS);
        Self {
            max_redo: config.max_redo,
            cooldown: Duration::try_from_secs_f64(cooldown).unwrap_or(Duration::ZERO),
            tick: Duration::from_millis(config.tick_millis),
            max_concurrent: config.max_concurrent,
            max_in_flight: None,
        }
    }

    /// Serializes the loop: at most one running task at a time
    pub fn single_session(mut self) -> Self {
        self.max_in_flight = Some(1);
        self
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_redo: 3,
            cooldown: Duration::from_secs(15),
            tick: Duration::from_millis(10),
            max_concurrent: 16,
            max_in_flight: None,
        }
    }
}

/// Cloneable flag that stops a loop from admitting new work
///
/// The first reason given wins. In-flight work still runs to completion.
#[derive(Debug, Clone, Default)]
pub struct HaltSignal {
    reason: Arc<Mutex<Option<String>>>,
}

impl HaltSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a halt; returns true if this call set the flag
    pub fn halt(&self, reason: impl Into<String>) -> bool {
        let mut guard = self.reason.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(reason.into());
        true
    }

    pub fn is_halted(&self) -> bool {
        self.reason.lock().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

/// Append-only list of payloads that could not be completed in this pass
///
/// Clones share the same underlying list, so several loops can escalate
/// into one list.
#[derive(Debug)]
pub struct EscalationList<P> {
    items: Arc<Mutex<Vec<P>>>,
}

impl<P> EscalationList<P> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, payload: P) {
        self.items.lock().push(payload);
    }

    pub fn extend(&self, payloads: impl IntoIterator<Item = P>) {
        self.items.lock().extend(payloads);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Removes and returns everything escalated so far
    pub fn take(&self) -> Vec<P> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl<P: Clone> EscalationList<P> {
    /// Copies the current contents
    pub fn snapshot(&self) -> Vec<P> {
        self.items.lock().clone()
    }
}

impl<P> Clone for EscalationList<P> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<P> Default for EscalationList<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a finished loop hands back to its caller
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Loop label (site name, "probe", ...)
    pub label: String,

    /// Final counters
    pub stats: RunStats,

    /// Payloads this loop appended to its escalation list
    pub escalations: usize,

    /// Usage recorded by completed items when usage recording was on
    pub usages: Vec<Usage>,

    /// Why the loop halted, if it did
    pub halt_reason: Option<String>,

    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// State shared between the loop and its launched tasks
struct Shared<P, T> {
    label: String,
    max_redo: u32,
    record_usage: bool,
    tracker: Mutex<StatusTracker>,
    retry: RetryQueue<P>,
    escalations: EscalationList<P>,
    escalation_pushes: AtomicUsize,
    halt: HaltSignal,
    usages: Mutex<Vec<Usage>>,
    running: AtomicUsize,
    sinks: Vec<Arc<dyn OutcomeSink<P, T>>>,
}

impl<P, T> Shared<P, T> {
    fn escalate(&self, payload: P) {
        self.escalations.push(payload);
        self.escalation_pushes.fetch_add(1, Ordering::SeqCst);
    }

    /// Single entry point for task outcomes
    fn report(&self, mut item: WorkItem<P>, attempt: Attempt<T>, usage: Option<Usage>) {
        match attempt {
            Attempt::Success(output) => {
                if let Some(usage) = usage {
                    self.usages.lock().push(usage);
                }
                for sink in &self.sinks {
                    if let Err(e) = sink.record_success(&item, &output) {
                        tracing::error!("{}: failed to record item {}: {}", self.label, item.id, e);
                    }
                }
                self.tracker.lock().record_success();
                tracing::debug!("{}: item {} succeeded", self.label, item.id);
            }

            Attempt::Failure(failure) => {
                if failure.kind.is_retryable() {
                    self.tracker
                        .lock()
                        .record_transient(failure.kind.is_throttle(), Instant::now());
                }
                if failure.kind.is_throttle() {
                    tracing::warn!(
                        "{}: throttled on item {}, pausing admissions",
                        self.label,
                        item.id
                    );
                }

                item.record_failure(failure.to_string());

                if failure.kind.is_retryable() && item.can_retry(self.max_redo) {
                    tracing::warn!(
                        "{}: item {} attempt {}/{} failed ({}), re-queued",
                        self.label,
                        item.id,
                        item.redo_count,
                        self.max_redo,
                        failure
                    );
                    self.retry.push(item);
                } else {
                    tracing::warn!(
                        "{}: item {} failed permanently after {} attempt(s): {}",
                        self.label,
                        item.id,
                        item.redo_count,
                        failure
                    );
                    for sink in &self.sinks {
                        if let Err(e) = sink.record_failure(&item) {
                            tracing::error!(
                                "{}: failed to record failure of item {}: {}",
                                self.label,
                                item.id,
                                e
                            );
                        }
                    }
                    self.tracker.lock().record_permanent();
                    self.escalate(item.payload);
                }
            }

            Attempt::Halt { reason } => {
                if self.halt.halt(reason.clone()) {
                    tracing::warn!("{}: halting admissions: {}", self.label, reason);
                }
                self.tracker.lock().record_escalated();
                self.escalate(item.payload);
            }
        }
    }
}

/// Rate-limited, retrying dispatcher for one stream of work
pub struct Dispatcher<P, W>
where
    P: Send + Sync + 'static,
    W: Worker<P>,
{
    settings: DispatchSettings,
    regulator: CapacityRegulator,
    worker: Arc<W>,
    gate: Arc<Semaphore>,
    shared: Arc<Shared<P, W::Output>>,
    secondary_padding: f64,
    next_id: u64,
}

impl<P, W> Dispatcher<P, W>
where
    P: Send + Sync + 'static,
    W: Worker<P>,
{
    /// Starts building a dispatcher
    pub fn builder(
        label: impl Into<String>,
        worker: Arc<W>,
        regulator: CapacityRegulator,
    ) -> DispatcherBuilder<P, W> {
        DispatcherBuilder {
            label: label.into(),
            worker,
            regulator,
            settings: DispatchSettings::default(),
            gate: None,
            sinks: Vec::new(),
            escalations: EscalationList::new(),
            halt: HaltSignal::new(),
            record_usage: false,
            secondary_padding: 0.0,
            first_id: 0,
            last_throttle: None,
        }
    }

    /// Handle that stops this loop from admitting new work
    pub fn halt_signal(&self) -> HaltSignal {
        self.shared.halt.clone()
    }

    /// The list this loop escalates into
    pub fn escalations(&self) -> &EscalationList<P> {
        &self.shared.escalations
    }

    /// The loop's retry queue
    pub fn retry_queue(&self) -> &RetryQueue<P> {
        &self.shared.retry
    }

    /// The loop's regulator
    pub fn regulator(&self) -> &CapacityRegulator {
        &self.regulator
    }

    /// Current counters
    pub fn stats(&self) -> RunStats {
        self.shared.tracker.lock().snapshot()
    }

    /// When this loop last saw a throttling signal
    pub fn last_throttle(&self) -> Option<Instant> {
        self.shared.tracker.lock().last_rate_limit_error_at()
    }

    /// Id that will be given to the next staged item
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Runs the loop until `source` is exhausted and nothing is in flight
    pub async fn run<S>(&mut self, mut source: S) -> RunReport
    where
        S: TaskSource<P>,
    {
        let label = self.shared.label.clone();
        let started_at = Instant::now();
        let pushes_before = self.shared.escalation_pushes.load(Ordering::SeqCst);

        let mut staged: Option<WorkItem<P>> = None;
        let mut exhausted = false;
        let mut next_progress = PROGRESS_EVERY;

        tracing::info!(
            "{}: dispatch started (ceiling {}, max redo {})",
            label,
            self.regulator.ceiling(),
            self.settings.max_redo
        );

        loop {
            if self.shared.halt.is_halted() {
                if !exhausted {
                    self.escalate_unlaunched(staged.take(), &mut source);
                    exhausted = true;
                } else if let Some(item) = staged.take() {
                    self.escalate_staged(item);
                }
                self.escalate_retries();
            }

            let nothing_to_admit = exhausted && staged.is_none() && self.shared.retry.is_empty();
            if !nothing_to_admit {
                let cooldown = self
                    .shared
                    .tracker
                    .lock()
                    .cooldown_remaining(self.settings.cooldown, Instant::now());
                if let Some(wait) = cooldown {
                    tracing::debug!("{}: cooling down for {:?}", label, wait);
                    tokio::time::sleep(wait).await;
                    continue;
                }
            }

            if staged.is_none() {
                if let Some(item) = self.shared.retry.pop() {
                    staged = Some(item);
                } else if !exhausted {
                    match source.next_task() {
                        Some(task) => staged = Some(self.stage(task)),
                        None => {
                            tracing::debug!("{}: task source exhausted", label);
                            exhausted = true;
                        }
                    }
                }
            }

            self.regulator.refill();

            if let Some(item) = staged.take() {
                if self.has_slot() && self.regulator.has_capacity(&item.estimated_cost) {
                    self.regulator.debit(&item.estimated_cost);
                    self.launch(item);
                    tokio::task::yield_now().await;
                    continue;
                }
                staged = Some(item);
            }

            let (in_flight, terminal) = {
                let tracker = self.shared.tracker.lock();
                (tracker.in_flight(), tracker.terminal())
            };

            if staged.is_none() && exhausted && in_flight == 0 && self.shared.retry.is_empty() {
                break;
            }

            if terminal >= next_progress {
                let elapsed = started_at.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::info!(
                    "{}: progress: {} done, {} in flight, {:.2} items/sec",
                    label,
                    terminal,
                    in_flight,
                    terminal as f64 / elapsed
                );
                next_progress = terminal + PROGRESS_EVERY;
            }

            tokio::time::sleep(self.settings.tick).await;
        }

        let stats = self.stats();
        let elapsed = started_at.elapsed();
        stats.log_summary(&label, elapsed);

        RunReport {
            label,
            stats,
            escalations: self.shared.escalation_pushes.load(Ordering::SeqCst) - pushes_before,
            usages: std::mem::take(&mut *self.shared.usages.lock()),
            halt_reason: self.shared.halt.reason(),
            elapsed,
        }
    }

    /// Turns a pulled task into a work item with an id and a cost
    fn stage(&mut self, task: Task<P>) -> WorkItem<P> {
        let mut cost = task
            .cost
            .unwrap_or_else(|| self.worker.estimate_cost(&task.payload));
        if self.secondary_padding > 0.0 {
            cost = cost.add_secondary(self.secondary_padding);
        }

        let id = self.next_id;
        self.next_id += 1;
        WorkItem::new(id, task.payload, cost)
    }

    fn has_slot(&self) -> bool {
        self.settings
            .max_in_flight
            .map_or(true, |max| self.shared.running.load(Ordering::SeqCst) < max)
    }

    /// Launches an item as a detached task
    fn launch(&mut self, item: WorkItem<P>) {
        self.shared
            .tracker
            .lock()
            .record_launch(item.is_first_attempt());
        self.shared.running.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            "{}: launching item {} (redo {}, cost {})",
            self.shared.label,
            item.id,
            item.redo_count,
            item.estimated_cost
        );

        let shared = Arc::clone(&self.shared);
        let worker = Arc::clone(&self.worker);
        let gate = Arc::clone(&self.gate);

        tokio::spawn(async move {
            let attempt = {
                let _permit = gate.acquire_owned().await.ok();
                match AssertUnwindSafe(worker.run(&item)).catch_unwind().await {
                    Ok(attempt) => attempt,
                    Err(_) => Attempt::failure(FailureKind::Fatal, "worker panicked"),
                }
            };

            let usage = match &attempt {
                Attempt::Success(output) if shared.record_usage => worker.usage(output),
                _ => None,
            };

            shared.report(item, attempt, usage);
            shared.running.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Hands the staged item and the rest of the source to escalation
    fn escalate_unlaunched<S: TaskSource<P>>(&mut self, staged: Option<WorkItem<P>>, source: &mut S) {
        let mut count = 0usize;

        if let Some(item) = staged {
            self.escalate_staged(item);
            count += 1;
        }

        for payload in source.drain_payloads() {
            self.shared.escalate(payload);
            count += 1;
        }

        tracing::warn!(
            "{}: escalated {} item(s) that were not launched",
            self.shared.label,
            count
        );
    }

    /// Escalates the item held back for admission
    ///
    /// Only a re-queued item counts as started; a fresh one never launched.
    fn escalate_staged(&mut self, item: WorkItem<P>) {
        if !item.is_first_attempt() {
            self.shared.tracker.lock().record_escalated();
        }
        tracing::debug!("{}: escalating staged item {}", self.shared.label, item.id);
        self.shared.escalate(item.payload);
    }

    /// Escalates items that were waiting for a retry when the loop halted
    fn escalate_retries(&mut self) {
        for item in self.shared.retry.drain() {
            self.shared.tracker.lock().record_escalated();
            self.shared.escalate(item.payload);
        }
    }
}

/// Builder for [`Dispatcher`]
pub struct DispatcherBuilder<P, W>
where
    P: Send + Sync + 'static,
    W: Worker<P>,
{
    label: String,
    worker: Arc<W>,
    regulator: CapacityRegulator,
    settings: DispatchSettings,
    gate: Option<Arc<Semaphore>>,
    sinks: Vec<Arc<dyn OutcomeSink<P, W::Output>>>,
    escalations: EscalationList<P>,
    halt: HaltSignal,
    record_usage: bool,
    secondary_padding: f64,
    first_id: u64,
    last_throttle: Option<Instant>,
}

impl<P, W> DispatcherBuilder<P, W>
where
    P: Send + Sync + 'static,
    W: Worker<P>,
{
    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shares a concurrency gate with other loops
    pub fn gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Adds an outcome sink; every sink sees every terminal outcome
    pub fn sink(mut self, sink: Arc<dyn OutcomeSink<P, W::Output>>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Escalates into an existing (possibly shared) list
    pub fn escalations(mut self, escalations: EscalationList<P>) -> Self {
        self.escalations = escalations;
        self
    }

    /// Uses an existing halt signal
    pub fn halt_signal(mut self, halt: HaltSignal) -> Self {
        self.halt = halt;
        self
    }

    /// Records per-item usage reported by the worker
    pub fn record_usage(mut self, record: bool) -> Self {
        self.record_usage = record;
        self
    }

    /// Adds a fixed amount to the second dimension of every estimated cost
    pub fn secondary_padding(mut self, padding: f64) -> Self {
        self.secondary_padding = padding;
        self
    }

    /// Id given to the first staged item
    pub fn first_id(mut self, id: u64) -> Self {
        self.first_id = id;
        self
    }

    /// Starts with the cool-down window of a throttling signal seen at `at`
    pub fn throttled_at(mut self, at: Option<Instant>) -> Self {
        self.last_throttle = at;
        self
    }

    pub fn build(self) -> Dispatcher<P, W> {
        let gate = self
            .gate
            .unwrap_or_else(|| Arc::new(Semaphore::new(self.settings.max_concurrent.max(1))));

        let mut tracker = StatusTracker::new();
        if let Some(at) = self.last_throttle {
            tracker.seed_rate_limit_error_at(at);
        }

        let shared = Shared {
            label: self.label,
            max_redo: self.settings.max_redo,
            record_usage: self.record_usage,
            tracker: Mutex::new(tracker),
            retry: RetryQueue::new(),
            escalations: self.escalations,
            escalation_pushes: AtomicUsize::new(0),
            halt: self.halt,
            usages: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            sinks: self.sinks,
        };

        Dispatcher {
            settings: self.settings,
            regulator: self.regulator,
            worker: self.worker,
            gate,
            shared: Arc::new(shared),
            secondary_padding: self.secondary_padding,
            next_id: self.first_id,
        }
    }
}
