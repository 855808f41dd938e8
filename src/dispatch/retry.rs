//! FIFO of work items waiting to be re-admitted
//!
//! The dispatch loop pops from the queue while finished units of work push
//! to it, so the queue is safe to share between them.

use crate::state::WorkItem;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Concurrent FIFO of items that failed transiently
#[derive(Debug)]
pub struct RetryQueue<P> {
    inner: Mutex<RetryInner<P>>,
}

#[derive(Debug)]
struct RetryInner<P> {
    queue: VecDeque<WorkItem<P>>,
    /// Number of insertions seen per item id
    insertions: HashMap<u64, u32>,
}

impl<P> RetryQueue<P> {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RetryInner {
                queue: VecDeque::new(),
                insertions: HashMap::new(),
            }),
        }
    }

    /// Appends an item to the back of the queue
    pub fn push(&self, item: WorkItem<P>) {
        let mut inner = self.inner.lock();
        *inner.insertions.entry(item.id).or_insert(0) += 1;
        inner.queue.push_back(item);
    }

    /// Removes the item at the front of the queue
    pub fn pop(&self) -> Option<WorkItem<P>> {
        self.inner.lock().queue.pop_front()
    }

    /// Removes every queued item, front first
    pub fn drain(&self) -> Vec<WorkItem<P>> {
        self.inner.lock().queue.drain(..).collect()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Returns true if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// How many times the item with `id` has been inserted
    pub fn reinsertions(&self, id: u64) -> u32 {
        self.inner.lock().insertions.get(&id).copied().unwrap_or(0)
    }

    /// Total insertions over the queue's lifetime
    pub fn total_reinsertions(&self) -> u64 {
        self.inner
            .lock()
            .insertions
            .values()
            .map(|&n| u64::from(n))
            .sum()
    }
}

impl<P> Default for RetryQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Capacity;

    fn item(id: u64) -> WorkItem<&'static str> {
        WorkItem::new(id, "payload", Capacity::requests(1.0))
    }

    #[test]
    fn test_fifo_order() {
        let queue = RetryQueue::new();
        queue.push(item(1));
        queue.push(item(2));
        queue.push(item(3));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().map(|i| i.id), Some(1));
        assert_eq!(queue.pop().map(|i| i.id), Some(2));
        assert_eq!(queue.pop().map(|i| i.id), Some(3));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reinsertions_counted_per_id() {
        let queue = RetryQueue::new();
        queue.push(item(7));
        let popped = queue.pop().unwrap();
        queue.push(popped);
        queue.push(item(8));

        assert_eq!(queue.reinsertions(7), 2);
        assert_eq!(queue.reinsertions(8), 1);
        assert_eq!(queue.reinsertions(9), 0);
        assert_eq!(queue.total_reinsertions(), 3);
    }

    #[test]
    fn test_drain() {
        let queue = RetryQueue::new();
        queue.push(item(1));
        queue.push(item(2));

        let drained: Vec<u64> = queue.drain().into_iter().map(|i| i.id).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(queue.is_empty());
    }
}
