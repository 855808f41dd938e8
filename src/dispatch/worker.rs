//! Unit-of-work contract
//!
//! A worker turns one work item into exactly one [`Attempt`]. Failures are
//! data, not Rust errors: the dispatcher decides whether to retry, fail or
//! escalate based on the failure kind.

use crate::state::{Capacity, WorkItem};
use async_trait::async_trait;
use std::fmt;
use tokio::time::Instant;

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Transport-level failure (connect, timeout, reset)
    Connectivity,

    /// Explicit rate-limit signal from the remote side
    Throttled,

    /// Non-success status that is not a throttling signal
    Status(u16),

    /// A response arrived but did not have the expected shape
    Validation,

    /// Failure that retrying cannot fix
    Fatal,
}

impl FailureKind {
    /// Whether the item may be re-queued after this failure
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }

    /// Whether this failure should open the shared cool-down window
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity"),
            Self::Throttled => write!(f, "throttled"),
            Self::Status(code) => write!(f, "status {}", code),
            Self::Validation => write!(f, "validation"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A failed attempt with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of running one unit of work
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    /// The item completed
    Success(T),

    /// The item failed; the dispatcher decides whether to retry
    Failure(Failure),

    /// The whole loop must stop admitting work
    ///
    /// The current item and everything not yet launched are escalated.
    Halt { reason: String },
}

impl<T> Attempt<T> {
    /// Shorthand for a failed attempt
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(Failure::new(kind, message))
    }

    /// Shorthand for a halting attempt
    pub fn halt(reason: impl Into<String>) -> Self {
        Self::Halt {
            reason: reason.into(),
        }
    }

    /// Returns true for a successful attempt
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Resource consumption observed for one completed item
///
/// Recorded only while a cost probe is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    /// Prompt-side cost (known before the call)
    pub prompt: f64,

    /// Completion-side cost (known only from the response)
    pub completion: f64,

    /// Remaining remote quota reported with the response
    pub remaining: Option<Capacity>,

    /// When the response was observed
    pub observed_at: Instant,
}

/// A unit-of-work implementation driven by a dispatcher
#[async_trait]
pub trait Worker<P>: Send + Sync + 'static
where
    P: Send + Sync + 'static,
{
    /// Value produced by a successful attempt
    type Output: Send + 'static;

    /// Runs one attempt for `item`
    async fn run(&self, item: &WorkItem<P>) -> Attempt<Self::Output>;

    /// Estimates the cost of a payload before its first admission
    fn estimate_cost(&self, _payload: &P) -> Capacity {
        Capacity::requests(1.0)
    }

    /// Extracts observed resource usage from a successful output
    fn usage(&self, _output: &Self::Output) -> Option<Usage> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(FailureKind::Connectivity.is_retryable());
        assert!(FailureKind::Throttled.is_retryable());
        assert!(FailureKind::Status(503).is_retryable());
        assert!(FailureKind::Validation.is_retryable());
        assert!(!FailureKind::Fatal.is_retryable());
    }

    #[test]
    fn test_only_throttled_opens_cooldown() {
        assert!(FailureKind::Throttled.is_throttle());
        assert!(!FailureKind::Status(429).is_throttle());
        assert!(!FailureKind::Connectivity.is_throttle());
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new(FailureKind::Status(502), "bad gateway");
        assert_eq!(failure.to_string(), "status 502: bad gateway");
    }

    #[test]
    fn test_attempt_helpers() {
        let ok: Attempt<u8> = Attempt::Success(1);
        assert!(ok.is_success());

        let halted: Attempt<u8> = Attempt::halt("challenge");
        assert_eq!(
            halted,
            Attempt::Halt {
                reason: "challenge".to_string()
            }
        );
        assert!(!Attempt::<u8>::failure(FailureKind::Fatal, "x").is_success());
    }
}
