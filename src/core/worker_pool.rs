//! Bounded worker pool with dedicated OS threads.
//!
//! Workers pull from a single bounded ready channel. Each attempt runs under a
//! timeout inside the worker's own single-threaded tokio runtime, with panics
//! caught and reported as failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_lanes::core::{WorkerPool, WorkerTask};
//! use prometheus_lanes::config::WorkerPoolConfig;
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new()
//!         .with_worker_count(4)
//!         .with_queue_capacity(8),
//!     my_executor,
//! )?;
//! pool.start()?;
//! pool.submit(WorkerTask::new("job-1", job))?;
//! pool.shutdown(Duration::from_secs(5));
//! ```

mod threads;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::core::{SchedulerError, TaskId};

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug)]
pub enum PoolError {
    /// The ready channel is full; the task was not accepted.
    QueueFull,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn, runtime construction, ...).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "task queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<PoolError> for SchedulerError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::QueueFull => Self::QueueFull("worker pool".into()),
            PoolError::PoolShutdown => Self::Shutdown,
            PoolError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            PoolError::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// Statistics about pool utilization and performance.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Ready-channel capacity.
    pub queue_capacity: usize,

    /// Workers currently executing a task.
    pub active_tasks: u64,

    /// Tasks waiting in the ready channel.
    pub queued_tasks: u64,

    /// Tasks that finished successfully.
    pub completed_tasks: u64,

    /// Tasks that finished with an error.
    pub failed_tasks: u64,

    /// Attempts the executor deferred for a later retry.
    pub retried_attempts: u64,

    /// Attempts that panicked.
    pub panicked_attempts: u64,

    /// Tasks accepted by `submit`.
    pub submitted_tasks: u64,

    /// Wall time spent executing tasks, in nanoseconds.
    pub processing_time_ns: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub queued_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub retried_attempts: AtomicU64,
    pub panicked_attempts: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub processing_time_ns: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize, queue_capacity: usize) -> PoolStats {
        PoolStats {
            worker_count,
            queue_capacity,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            retried_attempts: self.retried_attempts.load(Ordering::Relaxed),
            panicked_attempts: self.panicked_attempts.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            processing_time_ns: self.processing_time_ns.load(Ordering::Relaxed),
        }
    }
}

/// A job submitted to the worker pool together with its cancellation token.
#[derive(Debug)]
pub struct WorkerTask<J> {
    /// Identifier used in logs.
    pub id: TaskId,
    /// The job handed to the executor.
    pub job: J,
    cancel: CancellationToken,
}

impl<J> WorkerTask<J> {
    /// Wrap a job with a fresh cancellation token.
    pub fn new(id: impl Into<TaskId>, job: J) -> Self {
        Self {
            id: id.into(),
            job,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an existing token, typically one the submitter can fire later.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token observed by the running attempt.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

pub use threads::WorkerPool;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::QueueFull;
        assert_eq!(format!("{}", err), "task queue is full");

        let err = PoolError::InvalidConfig("worker_count must be greater than 0".into());
        assert_eq!(
            format!("{}", err),
            "invalid configuration: worker_count must be greater than 0"
        );
    }

    #[test]
    fn test_pool_error_into_scheduler_error() {
        let err: SchedulerError = PoolError::QueueFull.into();
        assert!(matches!(err, SchedulerError::QueueFull(_)));
        let err: SchedulerError = PoolError::PoolShutdown.into();
        assert!(matches!(err, SchedulerError::Shutdown));
    }

    #[test]
    fn test_pool_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.submitted_tasks.fetch_add(10, Ordering::Relaxed);
        counters.completed_tasks.fetch_add(5, Ordering::Relaxed);
        counters.processing_time_ns.fetch_add(1_000, Ordering::Relaxed);

        let stats = counters.snapshot(4, 8);
        assert_eq!(stats.worker_count, 4);
        assert_eq!(stats.queue_capacity, 8);
        assert_eq!(stats.submitted_tasks, 10);
        assert_eq!(stats.completed_tasks, 5);
        assert_eq!(stats.processing_time_ns, 1_000);
    }
}
