//! Leveled priority lane.
//!
//! Tasks sit in one FIFO list per priority level. Pops scan from the highest
//! level down, so the cost is O(levels) in the worst case and O(1) when load
//! concentrates on one level. An id lookup table gives O(1) location for
//! cancel and priority updates, followed by a splice within the level.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::core::{LaneKind, QueuedTask, SchedulerError, TaskId};

use super::Lane;

struct Levels<P> {
    levels: Vec<VecDeque<QueuedTask<P>>>,
    /// Task id -> level index. Always in sync with `levels`.
    lookup: HashMap<TaskId, usize>,
}

impl<P> Levels<P> {
    fn take(&mut self, id: &str) -> Option<QueuedTask<P>> {
        let level = self.lookup.remove(id)?;
        let list = &mut self.levels[level];
        let pos = list.iter().position(|t| t.id == id)?;
        list.remove(pos)
    }

    fn pop(&mut self) -> Option<QueuedTask<P>> {
        let task = self.levels.iter_mut().rev().find_map(VecDeque::pop_front)?;
        self.lookup.remove(&task.id);
        Some(task)
    }
}

/// Bounded multi-level priority queue with FIFO order inside a level.
pub struct PriorityQueue<P> {
    inner: Mutex<Levels<P>>,
    capacity: usize,
    max_priority: i32,
}

impl<P> PriorityQueue<P> {
    /// Create a queue holding at most `capacity` tasks at levels `0..=max_priority`.
    #[must_use]
    pub fn new(capacity: usize, max_priority: u32) -> Self {
        let max_priority = i32::try_from(max_priority).unwrap_or(i32::MAX);
        let level_count = usize::try_from(max_priority).unwrap_or(0) + 1;
        Self {
            inner: Mutex::new(Levels {
                levels: (0..level_count).map(|_| VecDeque::new()).collect(),
                lookup: HashMap::with_capacity(capacity.min(1024)),
            }),
            capacity,
            max_priority,
        }
    }

    /// Highest level accepted.
    #[must_use]
    pub const fn max_priority(&self) -> i32 {
        self.max_priority
    }

    /// Clamp a requested priority into the valid range.
    #[must_use]
    pub fn clamp(&self, priority: i32) -> i32 {
        priority.clamp(0, self.max_priority)
    }

    /// Remove and return the oldest task of the highest non-empty level.
    pub fn pop(&self) -> Option<QueuedTask<P>> {
        self.inner.lock().pop()
    }

    /// Remove up to `n` tasks, highest levels first, FIFO within a level.
    pub fn pop_batch(&self, n: usize) -> Vec<QueuedTask<P>> {
        let mut inner = self.inner.lock();
        let mut batch = Vec::with_capacity(n.min(inner.lookup.len()));
        while batch.len() < n {
            let Some(task) = inner.pop() else { break };
            batch.push(task);
        }
        batch
    }

    /// Move a queued task to a new level. It joins the tail of that level.
    ///
    /// Returns `false` if the id is not queued here.
    pub fn update_priority(&self, id: &str, priority: i32) -> bool {
        let priority = self.clamp(priority);
        let mut inner = self.inner.lock();
        let Some(mut task) = inner.take(id) else {
            return false;
        };
        task.priority = priority;
        let level = level_index(priority);
        inner.lookup.insert(task.id.clone(), level);
        inner.levels[level].push_back(task);
        true
    }

    /// Level of the next task `pop` would return.
    #[must_use]
    pub fn peek_priority(&self) -> Option<i32> {
        let inner = self.inner.lock();
        inner
            .levels
            .iter()
            .rposition(|level| !level.is_empty())
            .and_then(|idx| i32::try_from(idx).ok())
    }

    /// Number of tasks waiting at `priority` (after clamping).
    #[must_use]
    pub fn level_len(&self, priority: i32) -> usize {
        self.inner.lock().levels[level_index(self.clamp(priority))].len()
    }

    /// Put tasks back at the head of their levels, bypassing the capacity
    /// check. Used when a popped batch could not be dispatched; `tasks` must
    /// be in the order they were popped.
    pub fn restore(&self, tasks: Vec<QueuedTask<P>>) {
        let mut inner = self.inner.lock();
        for task in tasks.into_iter().rev() {
            let level = level_index(task.priority.clamp(0, self.max_priority));
            inner.lookup.insert(task.id.clone(), level);
            inner.levels[level].push_front(task);
        }
    }
}

impl<P> Lane<P> for PriorityQueue<P> {
    fn kind(&self) -> LaneKind {
        LaneKind::Priority
    }

    fn push(&self, mut task: QueuedTask<P>) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        if inner.lookup.len() >= self.capacity {
            return Err(SchedulerError::QueueFull(LaneKind::Priority.to_string()));
        }
        if inner.lookup.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        task.priority = self.clamp(task.priority);
        let level = level_index(task.priority);
        inner.lookup.insert(task.id.clone(), level);
        inner.levels[level].push_back(task);
        Ok(())
    }

    fn cancel(&self, id: &str) -> Option<QueuedTask<P>> {
        self.inner.lock().take(id)
    }

    fn contains(&self, id: &str) -> bool {
        self.inner.lock().lookup.contains_key(id)
    }

    fn len(&self) -> usize {
        self.inner.lock().lookup.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

fn level_index(priority: i32) -> usize {
    usize::try_from(priority).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, priority: i32) -> QueuedTask<()> {
        QueuedTask::new(id, ()).with_priority(priority)
    }

    fn ids(tasks: &[QueuedTask<()>]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_priority_ordering() {
        let q = PriorityQueue::new(100, 10);
        q.push(task("a", 5)).unwrap();
        q.push(task("b", 1)).unwrap();
        q.push(task("c", 5)).unwrap();
        q.push(task("d", 9)).unwrap();

        assert_eq!(q.peek_priority(), Some(9));
        let batch = q.pop_batch(10);
        assert_eq!(ids(&batch), vec!["d", "a", "c", "b"]);
        assert!(q.is_empty());
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_priority_is_clamped() {
        let q = PriorityQueue::new(10, 3);
        q.push(task("hi", 99)).unwrap();
        q.push(task("lo", -4)).unwrap();
        assert_eq!(q.level_len(3), 1);
        assert_eq!(q.level_len(0), 1);
        assert_eq!(q.pop().unwrap().priority, 3);
        assert_eq!(q.pop().unwrap().priority, 0);
    }

    #[test]
    fn test_queue_full_and_duplicate() {
        let q = PriorityQueue::new(2, 10);
        q.push(task("a", 1)).unwrap();
        assert!(matches!(q.push(task("a", 2)), Err(SchedulerError::DuplicateTask(_))));
        q.push(task("b", 1)).unwrap();
        assert!(matches!(q.push(task("c", 1)), Err(SchedulerError::QueueFull(_))));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_cancel_keeps_lookup_consistent() {
        let q = PriorityQueue::new(10, 10);
        q.push(task("a", 2)).unwrap();
        q.push(task("b", 2)).unwrap();
        q.push(task("c", 2)).unwrap();

        assert_eq!(q.cancel("b").map(|t| t.id), Some("b".to_string()));
        assert!(q.cancel("b").is_none());
        assert!(!q.contains("b"));
        assert_eq!(q.len(), 2);
        assert_eq!(ids(&q.pop_batch(5)), vec!["a", "c"]);
    }

    #[test]
    fn test_update_priority_moves_to_tail() {
        let q = PriorityQueue::new(10, 10);
        q.push(task("a", 7)).unwrap();
        q.push(task("b", 1)).unwrap();
        q.push(task("c", 1)).unwrap();

        assert!(q.update_priority("b", 7));
        assert!(!q.update_priority("zzz", 7));
        assert_eq!(q.level_len(1), 1);
        assert_eq!(ids(&q.pop_batch(5)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_restore_puts_batch_back_in_order() {
        let q = PriorityQueue::new(10, 10);
        q.push(task("a", 4)).unwrap();
        q.push(task("b", 4)).unwrap();
        q.push(task("c", 4)).unwrap();

        let batch = q.pop_batch(2);
        q.restore(batch);
        assert_eq!(q.len(), 3);
        assert_eq!(ids(&q.pop_batch(5)), vec!["a", "b", "c"]);
    }
}
