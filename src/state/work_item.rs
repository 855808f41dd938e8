//! Work items tracked by a dispatch loop
//!
//! A work item wraps an opaque payload with the bookkeeping the loop needs:
//! a stable id, how many times it has been re-queued, its estimated cost and
//! the error messages of failed attempts.

use crate::state::Capacity;

/// A payload admitted (or about to be admitted) by a dispatcher
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    /// Monotonically increasing id, assigned when the item is first staged
    pub id: u64,

    /// The opaque request descriptor
    pub payload: P,

    /// Number of times this item has been re-queued after a transient failure
    pub redo_count: u32,

    /// Estimated cost, computed once before the first admission
    pub estimated_cost: Capacity,

    /// Messages from failed attempts, oldest first
    pub errors: Vec<String>,
}

impl<P> WorkItem<P> {
    /// Creates a fresh work item that has never been attempted
    pub fn new(id: u64, payload: P, estimated_cost: Capacity) -> Self {
        Self {
            id,
            payload,
            redo_count: 0,
            estimated_cost,
            errors: Vec::new(),
        }
    }

    /// Returns true if the item has not been re-queued yet
    pub fn is_first_attempt(&self) -> bool {
        self.redo_count == 0
    }

    /// Records a failed attempt and bumps the redo counter
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.redo_count += 1;
    }

    /// Whether another attempt is allowed under `max_redo`
    pub fn can_retry(&self, max_redo: u32) -> bool {
        self.redo_count < max_redo
    }
}
