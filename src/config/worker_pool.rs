//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default stack size for worker threads (2 MiB).
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Configuration for a [`WorkerPool`](crate::core::WorkerPool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of dedicated worker threads.
    pub worker_count: usize,
    /// Capacity of the ready channel feeding the workers.
    pub queue_capacity: usize,
    /// Upper bound on a single execution attempt.
    pub task_timeout: Duration,
    /// Stack size for each worker thread.
    pub thread_stack_size: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            worker_count: workers,
            queue_capacity: workers,
            task_timeout: Duration::from_secs(30),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "lanes-worker".into(),
        }
    }
}

impl WorkerPoolConfig {
    /// Configuration with defaults sized to the host CPU count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the ready-channel capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        if self.task_timeout.is_zero() {
            return Err("task_timeout must be greater than 0".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_validate() {
        let cfg = WorkerPoolConfig::new()
            .with_worker_count(3)
            .with_queue_capacity(6)
            .with_task_timeout(Duration::from_millis(50));
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.queue_capacity, 6);

        assert!(cfg.clone().with_worker_count(0).validate().is_err());
        assert!(cfg.clone().with_queue_capacity(0).validate().is_err());
        assert!(cfg.with_task_timeout(Duration::ZERO).validate().is_err());
    }
}
