//! Rate-limited, retrying dispatch of independent units of work
//!
//! This module contains:
//! - The capacity regulator (continuous-refill token bucket)
//! - Task sources and the unit-of-work contract
//! - The retry queue
//! - The dispatch loop itself and the cost probe built on top of it

mod dispatcher;
mod probe;
mod regulator;
mod retry;
mod source;
mod worker;

pub use dispatcher::{
    DispatchSettings, Dispatcher, DispatcherBuilder, EscalationList, HaltSignal, RunReport,
};
pub use probe::{calibrate, calibrated_regulator, Calibration, CostProbe, ProbeReport};
pub use regulator::{CapacityRegulator, SharedRegulator};
pub use retry::RetryQueue;
pub use source::{iter_source, IterSource, Prepend, Take, Task, TaskList, TaskSource};
pub use worker::{Attempt, Failure, FailureKind, Usage, Worker};
