//! Configuration models for the scheduler and its worker pool.

pub mod scheduler;
pub mod worker_pool;

pub use scheduler::{BackoffKind, SchedulerConfig, MAX_PRIORITY_LIMIT};
pub use worker_pool::WorkerPoolConfig;
