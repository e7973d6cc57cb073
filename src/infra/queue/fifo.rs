//! Immediate lane: a bounded FIFO with an id index.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use crate::core::{LaneKind, QueuedTask, SchedulerError, TaskId};

use super::Lane;

struct Fifo<P> {
    tasks: VecDeque<QueuedTask<P>>,
    ids: HashSet<TaskId>,
}

/// Strict FIFO lane for priority-0 tasks.
///
/// Cancelled tasks are spliced out rather than left behind as tombstones, so
/// `len` always reflects live tasks.
pub struct FifoQueue<P> {
    inner: Mutex<Fifo<P>>,
    capacity: usize,
}

impl<P> FifoQueue<P> {
    /// Create a lane holding at most `capacity` tasks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Fifo {
                tasks: VecDeque::with_capacity(capacity.min(1024)),
                ids: HashSet::with_capacity(capacity.min(1024)),
            }),
            capacity,
        }
    }

    /// Remove and return the oldest task.
    pub fn pop(&self) -> Option<QueuedTask<P>> {
        let mut inner = self.inner.lock();
        let task = inner.tasks.pop_front()?;
        inner.ids.remove(&task.id);
        Some(task)
    }

    /// Remove up to `n` tasks in arrival order.
    pub fn pop_batch(&self, n: usize) -> Vec<QueuedTask<P>> {
        let mut inner = self.inner.lock();
        let take = n.min(inner.tasks.len());
        let batch: Vec<_> = inner.tasks.drain(..take).collect();
        for task in &batch {
            inner.ids.remove(&task.id);
        }
        batch
    }

    /// Put tasks back at the head, bypassing the capacity check. `tasks` must
    /// be in the order they were popped.
    pub fn restore(&self, tasks: Vec<QueuedTask<P>>) {
        let mut inner = self.inner.lock();
        for task in tasks.into_iter().rev() {
            inner.ids.insert(task.id.clone());
            inner.tasks.push_front(task);
        }
    }
}

impl<P> Lane<P> for FifoQueue<P> {
    fn kind(&self) -> LaneKind {
        LaneKind::Immediate
    }

    fn push(&self, task: QueuedTask<P>) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        if inner.tasks.len() >= self.capacity {
            return Err(SchedulerError::QueueFull(LaneKind::Immediate.to_string()));
        }
        if !inner.ids.insert(task.id.clone()) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        inner.tasks.push_back(task);
        Ok(())
    }

    fn cancel(&self, id: &str) -> Option<QueuedTask<P>> {
        let mut inner = self.inner.lock();
        if !inner.ids.remove(id) {
            return None;
        }
        let pos = inner.tasks.iter().position(|t| t.id == id)?;
        inner.tasks.remove(pos)
    }

    fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains(id)
    }

    fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
