//! Core scheduling: tasks, lanes orchestration, worker pool, retry, and metrics.

pub mod audit;
mod dispatcher;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod retry;
pub mod task;
pub mod task_queue;
pub mod wake;
pub mod worker_pool;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use error::{AppResult, SchedulerError, TaskError};
pub use executor::{
    processor_fn, FnProcessor, Settlement, TaskContext, TaskProcessor, WorkerExecutor,
};
pub use metrics::{Metrics, MetricsSample, QueueMetrics};
pub use retry::RetryPolicy;
pub use task::{LaneKind, QueuedTask, TaskId, TaskSnapshot, TaskStatus};
pub use task_queue::TaskQueue;
pub use wake::Wakeup;
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerTask};
