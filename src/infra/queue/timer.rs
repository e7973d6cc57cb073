//! Time-triggered lane.
//!
//! A binary min-heap keyed by `(due_at_ms, sequence)` with an id -> slot
//! index so cancels are O(log n) instead of a scan. The sequence number keeps
//! tasks with the same trigger time in submission order; restored tasks take
//! negative sequence numbers so they go back ahead of their peers. A task
//! waiting out a retry is keyed by its retry time instead of its trigger time,
//! which lets the scheduler reuse this heap for backoff. The queue never reads
//! a clock itself; the dispatcher passes `now` into [`TimerQueue::due_tasks`].

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::core::{LaneKind, QueuedTask, SchedulerError, TaskId};

use super::Lane;

struct Entry<P> {
    due_at_ms: u128,
    seq: i64,
    task: QueuedTask<P>,
}

impl<P> Entry<P> {
    const fn key(&self) -> (u128, i64) {
        (self.due_at_ms, self.seq)
    }
}

struct Heap<P> {
    entries: Vec<Entry<P>>,
    /// Task id -> index in `entries`.
    positions: HashMap<TaskId, usize>,
    next_seq: i64,
    front_seq: i64,
}

impl<P> Heap<P> {
    fn insert(&mut self, due_at_ms: u128, task: QueuedTask<P>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert_with_seq(due_at_ms, seq, task);
    }

    fn insert_front(&mut self, due_at_ms: u128, task: QueuedTask<P>) {
        self.front_seq -= 1;
        let seq = self.front_seq;
        self.insert_with_seq(due_at_ms, seq, task);
    }

    fn insert_with_seq(&mut self, due_at_ms: u128, seq: i64, task: QueuedTask<P>) {
        let idx = self.entries.len();
        self.positions.insert(task.id.clone(), idx);
        self.entries.push(Entry {
            due_at_ms,
            seq,
            task,
        });
        self.sift_up(idx);
    }

    fn remove_at(&mut self, idx: usize) -> Option<QueuedTask<P>> {
        let last = self.entries.len().checked_sub(1)?;
        self.swap(idx, last);
        let entry = self.entries.pop()?;
        self.positions.remove(&entry.task.id);
        if idx < self.entries.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        Some(entry.task)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].task.id.clone(), a);
        self.positions.insert(self.entries[b].task.id.clone(), b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.entries[idx].key() >= self.entries[parent].key() {
                break;
            }
            self.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && self.entries[left].key() < self.entries[smallest].key() {
                smallest = left;
            }
            if right < len && self.entries[right].key() < self.entries[smallest].key() {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn peek_due(&self, now_ms: u128) -> bool {
        self.entries.first().is_some_and(|e| e.due_at_ms <= now_ms)
    }
}

/// Bounded queue of tasks ordered by trigger time.
pub struct TimerQueue<P> {
    inner: Mutex<Heap<P>>,
    capacity: usize,
}

impl<P> TimerQueue<P> {
    /// Create a queue holding at most `capacity` tasks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Heap {
                entries: Vec::with_capacity(capacity.min(1024)),
                positions: HashMap::with_capacity(capacity.min(1024)),
                next_seq: 0,
                front_seq: 0,
            }),
            capacity,
        }
    }

    /// Remove and return every task due at or before `now_ms`, earliest first.
    pub fn due_tasks(&self, now_ms: u128) -> Vec<QueuedTask<P>> {
        self.due_tasks_limit(now_ms, usize::MAX)
    }

    /// Like [`due_tasks`](Self::due_tasks) but returns at most `limit` tasks;
    /// the rest stay queued.
    pub fn due_tasks_limit(&self, now_ms: u128, limit: usize) -> Vec<QueuedTask<P>> {
        let mut heap = self.inner.lock();
        let mut due = Vec::new();
        while due.len() < limit && heap.peek_due(now_ms) {
            let Some(task) = heap.remove_at(0) else { break };
            due.push(task);
        }
        due
    }

    /// Due time of the earliest task.
    #[must_use]
    pub fn next_due_ms(&self) -> Option<u128> {
        self.inner.lock().entries.first().map(|e| e.due_at_ms)
    }

    /// Put tasks back ahead of tasks with the same due time, without a
    /// capacity check. Used when a due batch could not be dispatched; `tasks`
    /// must be in the order they were popped.
    pub fn restore(&self, tasks: Vec<QueuedTask<P>>) {
        let mut heap = self.inner.lock();
        for task in tasks.into_iter().rev() {
            let at = task.due_at_ms().unwrap_or(0);
            heap.insert_front(at, task);
        }
    }
}

impl<P> Lane<P> for TimerQueue<P> {
    fn kind(&self) -> LaneKind {
        LaneKind::Timer
    }

    fn push(&self, task: QueuedTask<P>) -> Result<(), SchedulerError> {
        let Some(at) = task.due_at_ms() else {
            return Err(SchedulerError::InvalidTask(format!(
                "task {} has no trigger time",
                task.id
            )));
        };
        let mut heap = self.inner.lock();
        if heap.entries.len() >= self.capacity {
            return Err(SchedulerError::QueueFull(LaneKind::Timer.to_string()));
        }
        if heap.positions.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        heap.insert(at, task);
        Ok(())
    }

    fn cancel(&self, id: &str) -> Option<QueuedTask<P>> {
        let mut heap = self.inner.lock();
        let idx = *heap.positions.get(id)?;
        heap.remove_at(idx)
    }

    fn contains(&self, id: &str) -> bool {
        self.inner.lock().positions.contains_key(id)
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, at: u128) -> QueuedTask<()> {
        QueuedTask::new(id, ()).with_trigger_at_ms(at)
    }

    fn ids(tasks: &[QueuedTask<()>]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_due_tasks_in_trigger_order() {
        let q = TimerQueue::new(10);
        q.push(task("late", 300)).unwrap();
        q.push(task("early", 100)).unwrap();
        q.push(task("mid", 200)).unwrap();
        q.push(task("mid2", 200)).unwrap();

        assert!(q.due_tasks(99).is_empty());
        assert_eq!(q.next_due_ms(), Some(100));
        assert_eq!(ids(&q.due_tasks(200)), vec!["early", "mid", "mid2"]);
        assert_eq!(q.len(), 1);
        assert_eq!(ids(&q.due_tasks(1_000)), vec!["late"]);
        assert_eq!(q.next_due_ms(), None);
    }

    #[test]
    fn test_due_tasks_limit() {
        let q = TimerQueue::new(10);
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            q.push(task(id, i as u128)).unwrap();
        }
        assert_eq!(ids(&q.due_tasks_limit(10, 2)), vec!["a", "b"]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_cancel_from_middle_keeps_heap_order() {
        let q = TimerQueue::new(20);
        for i in 0..10u128 {
            q.push(task(&format!("t{i}"), 100 - i * 5)).unwrap();
        }
        assert!(q.cancel("t3").is_some());
        assert!(q.cancel("t3").is_none());
        assert!(!q.contains("t3"));

        let due = q.due_tasks(1_000);
        assert_eq!(due.len(), 9);
        let times: Vec<u128> = due.iter().map(|t| t.trigger_at_ms.unwrap()).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);
    }

    #[test]
    fn test_restore_keeps_order_among_equal_triggers() {
        let q = TimerQueue::new(10);
        for id in ["a", "b", "c", "d"] {
            q.push(task(id, 50)).unwrap();
        }
        let batch = q.due_tasks_limit(100, 2);
        q.restore(batch);
        assert_eq!(ids(&q.due_tasks(100)), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_pending_retry_time_takes_precedence() {
        let q = TimerQueue::new(10);
        let mut retry = QueuedTask::new("retry", ());
        retry.retry_at_ms = Some(40);
        q.push(retry).unwrap();
        q.push(task("timer", 20)).unwrap();

        assert_eq!(q.next_due_ms(), Some(20));
        assert_eq!(ids(&q.due_tasks(30)), vec!["timer"]);
        let batch = q.due_tasks(40);
        assert_eq!(ids(&batch), vec!["retry"]);
        q.restore(batch);
        assert_eq!(q.next_due_ms(), Some(40));
    }

    #[test]
    fn test_rejects_full_duplicate_and_untimed() {
        let q = TimerQueue::new(1);
        assert!(matches!(
            q.push(QueuedTask::new("x", ())),
            Err(SchedulerError::InvalidTask(_))
        ));
        q.push(task("a", 5)).unwrap();
        assert!(matches!(q.push(task("b", 5)), Err(SchedulerError::QueueFull(_))));

        let q = TimerQueue::new(5);
        q.push(task("a", 5)).unwrap();
        assert!(matches!(q.push(task("a", 6)), Err(SchedulerError::DuplicateTask(_))));
    }
}
