//! Admission lanes.

pub mod fifo;
pub mod priority;
pub mod timer;

pub use fifo::FifoQueue;
pub use priority::PriorityQueue;
pub use timer::TimerQueue;

use crate::core::{LaneKind, QueuedTask, SchedulerError};

/// Operations shared by every lane.
///
/// Each lane guards its contents with its own lock; the capacity check and the
/// insertion happen in one critical section.
pub trait Lane<P> {
    /// Which admission path this lane implements.
    fn kind(&self) -> LaneKind;
    /// Admit a task.
    ///
    /// # Errors
    ///
    /// `QueueFull` at capacity, `DuplicateTask` if the id is already queued,
    /// `InvalidTask` if the task does not fit this lane.
    fn push(&self, task: QueuedTask<P>) -> Result<(), SchedulerError>;
    /// Remove a queued task by id.
    fn cancel(&self, id: &str) -> Option<QueuedTask<P>>;
    /// Whether the id is queued here.
    fn contains(&self, id: &str) -> bool;
    /// Number of queued tasks.
    fn len(&self) -> usize;
    /// Maximum number of queued tasks.
    fn capacity(&self) -> usize;
    /// Whether the lane is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
