//! Task records and lifecycle states.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::TaskProcessor;

/// Caller-supplied task identifier.
pub type TaskId = String;

/// Lifecycle state of a task.
///
/// Transitions only move forward, except for the `Retrying -> Running` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted to a lane, waiting for dispatch.
    Pending,
    /// Executing on a worker.
    Running,
    /// Waiting out a retry delay, off the worker pool.
    Retrying,
    /// Finished successfully.
    Completed,
    /// Failed permanently.
    Failed,
    /// Canceled by the caller.
    Canceled,
}

impl TaskStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Canceled)
            | (Self::Running, Self::Retrying | Self::Completed | Self::Failed | Self::Canceled)
            | (Self::Retrying, Self::Running | Self::Failed | Self::Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Admission path a task was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneKind {
    /// Strict FIFO lane for priority-0 tasks.
    Immediate,
    /// Leveled lane for tasks with a positive priority.
    Priority,
    /// Lane for tasks with a trigger time.
    Timer,
}

impl LaneKind {
    /// Lane name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Priority => "priority",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work with its scheduling attributes.
///
/// Built with [`QueuedTask::new`] and the `with_*` setters, then handed to
/// [`TaskQueue::push`](crate::core::TaskQueue::push) or to a lane directly.
pub struct QueuedTask<P> {
    /// Unique id among tasks that are queued or running.
    pub id: TaskId,
    /// Opaque label for logs and metrics.
    pub task_type: String,
    /// Priority level; `0` routes to the immediate lane.
    pub priority: i32,
    /// Data handed to the processor.
    pub payload: P,
    /// Trigger time in milliseconds since the epoch; routes to the timer lane.
    pub trigger_at_ms: Option<u128>,
    /// Retries performed so far.
    pub retry_count: u32,
    /// Retry budget; the queue default applies when unset.
    pub max_retries: Option<u32>,
    /// Base retry delay; the queue default applies when unset.
    pub retry_delay: Option<Duration>,
    /// When the last retry was scheduled.
    pub last_retry_ms: Option<u128>,
    /// When the task was admitted.
    pub enqueued_at_ms: u128,
    /// Processor override; the queue default applies when unset.
    pub processor: Option<Arc<dyn TaskProcessor<P>>>,
    cancel: CancellationToken,
    /// Sequence number assigned at admission; tells a reused id apart from
    /// the task that held it before.
    pub(crate) admission: u64,
    /// Clock time the next retry becomes due.
    pub(crate) retry_at_ms: Option<u128>,
}

impl<P> QueuedTask<P> {
    /// Create an immediate-lane task.
    pub fn new(id: impl Into<TaskId>, payload: P) -> Self {
        Self {
            id: id.into(),
            task_type: String::new(),
            priority: 0,
            payload,
            trigger_at_ms: None,
            retry_count: 0,
            max_retries: None,
            retry_delay: None,
            last_retry_ms: None,
            enqueued_at_ms: 0,
            processor: None,
            cancel: CancellationToken::new(),
            admission: 0,
            retry_at_ms: None,
        }
    }

    /// Set the task type label.
    #[must_use]
    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Set the priority level.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Schedule the task for an absolute time (ms since epoch).
    #[must_use]
    pub const fn with_trigger_at_ms(mut self, at_ms: u128) -> Self {
        self.trigger_at_ms = Some(at_ms);
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the base retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Use a specific processor for this task.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn TaskProcessor<P>>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Token fired when the task is canceled.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Lane this task is routed to at admission.
    ///
    /// A zero trigger time counts as unset.
    #[must_use]
    pub fn lane(&self) -> LaneKind {
        if self.trigger_at_ms.is_some_and(|at| at > 0) {
            LaneKind::Timer
        } else if self.priority > 0 {
            LaneKind::Priority
        } else {
            LaneKind::Immediate
        }
    }

    /// Time the timer heap orders this task by: a pending retry wins over
    /// the trigger time.
    pub(crate) fn due_at_ms(&self) -> Option<u128> {
        self.retry_at_ms.or(self.trigger_at_ms)
    }

    pub(crate) fn reset_cancel(&mut self) {
        self.cancel = CancellationToken::new();
    }
}

impl<P: fmt::Debug> fmt::Debug for QueuedTask<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedTask")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("priority", &self.priority)
            .field("payload", &self.payload)
            .field("trigger_at_ms", &self.trigger_at_ms)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_at_ms", &self.retry_at_ms)
            .field("enqueued_at_ms", &self.enqueued_at_ms)
            .field("has_processor", &self.processor.is_some())
            .field("canceled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Point-in-time view of a task tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub id: TaskId,
    /// Task type label.
    pub task_type: String,
    /// Lane the task was admitted to.
    pub lane: LaneKind,
    /// Effective priority level.
    pub priority: i32,
    /// Current status.
    pub status: TaskStatus,
    /// Retries performed so far.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Message of the most recent execution error.
    pub last_error: Option<String>,
    /// Admission time.
    pub enqueued_at_ms: u128,
    /// First dispatch time.
    pub started_at_ms: Option<u128>,
    /// Time the task reached a terminal status.
    pub finished_at_ms: Option<u128>,
    /// When the last retry was scheduled.
    pub last_retry_ms: Option<u128>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_selection() {
        assert_eq!(QueuedTask::new("a", ()).lane(), LaneKind::Immediate);
        assert_eq!(QueuedTask::new("a", ()).with_priority(-3).lane(), LaneKind::Immediate);
        assert_eq!(QueuedTask::new("a", ()).with_priority(2).lane(), LaneKind::Priority);
        assert_eq!(
            QueuedTask::new("a", ()).with_priority(2).with_trigger_at_ms(5).lane(),
            LaneKind::Timer
        );
        assert_eq!(QueuedTask::new("a", ()).with_trigger_at_ms(0).lane(), LaneKind::Immediate);
    }

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Running));
        assert!(Retrying.can_transition_to(Canceled));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Canceled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Canceled.is_terminal() && !Retrying.is_terminal());
    }

    #[test]
    fn test_pending_retry_orders_before_trigger() {
        let mut task = QueuedTask::new("a", ()).with_trigger_at_ms(50);
        assert_eq!(task.due_at_ms(), Some(50));
        task.retry_at_ms = Some(900);
        assert_eq!(task.due_at_ms(), Some(900));
        assert_eq!(QueuedTask::new("b", ()).due_at_ms(), None);
    }
}
