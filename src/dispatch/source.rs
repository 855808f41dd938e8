//! Pull-based task sources
//!
//! A source hands out payloads one at a time and signals exhaustion by
//! returning `None`. Sources are consumed lazily: the dispatcher only pulls
//! when it has nothing staged.

use crate::state::Capacity;

/// A payload pulled from a source, with an optional pre-computed cost
#[derive(Debug, Clone)]
pub struct Task<P> {
    /// The opaque request descriptor
    pub payload: P,

    /// Cost estimate supplied by the source; the worker estimates it if absent
    pub cost: Option<Capacity>,
}

impl<P> Task<P> {
    /// A task whose cost the worker will estimate
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            cost: None,
        }
    }

    /// A task with a known cost
    pub fn with_cost(payload: P, cost: Capacity) -> Self {
        Self {
            payload,
            cost: Some(cost),
        }
    }
}

/// A lazily consumed, possibly unbounded producer of tasks
pub trait TaskSource<P>: Send {
    /// Pulls the next task, or `None` once the source is exhausted
    fn next_task(&mut self) -> Option<Task<P>>;

    /// Pulls every remaining payload
    fn drain_payloads(&mut self) -> Vec<P> {
        let mut payloads = Vec::new();
        while let Some(task) = self.next_task() {
            payloads.push(task.payload);
        }
        payloads
    }
}

impl<P, S: TaskSource<P> + ?Sized> TaskSource<P> for &mut S {
    fn next_task(&mut self) -> Option<Task<P>> {
        (**self).next_task()
    }
}

impl<P, S: TaskSource<P> + ?Sized> TaskSource<P> for Box<S> {
    fn next_task(&mut self) -> Option<Task<P>> {
        (**self).next_task()
    }
}

/// Adapts any iterator of payloads into a task source
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I> {
    /// Wraps an iterator
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<P, I> TaskSource<P> for IterSource<I>
where
    I: Iterator<Item = P> + Send,
{
    fn next_task(&mut self) -> Option<Task<P>> {
        self.iter.next().map(Task::new)
    }
}

/// Builds a source from anything iterable
pub fn iter_source<T>(items: T) -> IterSource<T::IntoIter>
where
    T: IntoIterator,
{
    IterSource::new(items.into_iter())
}

/// A source of tasks that already carry their costs
#[derive(Debug, Clone)]
pub struct TaskList<P> {
    tasks: std::collections::VecDeque<Task<P>>,
}

impl<P> TaskList<P> {
    /// Creates a source from a list of tasks
    pub fn new(tasks: Vec<Task<P>>) -> Self {
        Self {
            tasks: tasks.into(),
        }
    }

    /// Remaining tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if nothing remains
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<P: Send> TaskSource<P> for TaskList<P> {
    fn next_task(&mut self) -> Option<Task<P>> {
        self.tasks.pop_front()
    }
}

/// Yields at most `limit` tasks from an inner source
pub struct Take<S> {
    inner: S,
    remaining: usize,
}

impl<S> Take<S> {
    /// Limits `inner` to `limit` tasks
    pub fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl<P, S: TaskSource<P>> TaskSource<P> for Take<S> {
    fn next_task(&mut self) -> Option<Task<P>> {
        if self.remaining == 0 {
            return None;
        }
        let task = self.inner.next_task()?;
        self.remaining -= 1;
        Some(task)
    }
}

/// Yields one held-back task before continuing with an inner source
pub struct Prepend<P, S> {
    head: Option<Task<P>>,
    inner: S,
}

impl<P, S> Prepend<P, S> {
    /// Puts `head` in front of `inner`
    pub fn new(head: Task<P>, inner: S) -> Self {
        Self {
            head: Some(head),
            inner,
        }
    }
}

impl<P: Send, S: TaskSource<P>> TaskSource<P> for Prepend<P, S> {
    fn next_task(&mut self) -> Option<Task<P>> {
        self.head.take().or_else(|| self.inner.next_task())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iter_source_exhaustion() {
        let mut source = iter_source(vec![1, 2]);
        assert_eq!(source.next_task().map(|t| t.payload), Some(1));
        assert_eq!(source.next_task().map(|t| t.payload), Some(2));
        assert!(source.next_task().is_none());
        assert!(source.next_task().is_none());
    }

    #[test]
    fn test_iter_source_is_lazy() {
        let mut pulled = 0;
        {
            let mut source = iter_source((0..).inspect(|_| pulled += 1));
            source.next_task();
            source.next_task();
        }
        assert_eq!(pulled, 2);
    }

    #[test]
    fn test_take_then_continue() {
        let mut source = iter_source(0..5);
        let first: Vec<i32> = Take::new(&mut source, 3).drain_payloads();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(source.drain_payloads(), vec![3, 4]);
    }

    #[test]
    fn test_prepend() {
        let mut source = Prepend::new(Task::new(9), iter_source(vec![1, 2]));
        assert_eq!(source.drain_payloads(), vec![9, 1, 2]);
    }

    #[test]
    fn test_task_list_keeps_costs() {
        let mut list = TaskList::new(vec![Task::with_cost("a", Capacity::single_request(12.0))]);
        assert_eq!(list.len(), 1);
        let task = list.next_task().unwrap();
        assert_eq!(task.cost, Some(Capacity::single_request(12.0)));
        assert!(list.is_empty());
    }
}
