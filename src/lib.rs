//! # Prometheus Lanes
//!
//! An in-process, multi-lane task scheduler built on a bounded pool of
//! dedicated worker threads.
//!
//! Tasks enter through one of three lanes and a single dispatcher moves them
//! into the worker pool whenever it has room:
//!
//! - **Timer lane**: tasks with a trigger time, released once the clock passes it
//! - **Priority lane**: levels `1..=max_priority`, highest first, FIFO within a level
//! - **Immediate lane**: strict FIFO for everything else
//!
//! Per dispatch tick the precedence is due timers, then priority levels from
//! high to low, then the immediate lane.
//!
//! ## Key Features
//!
//! - **Backpressure**: admission fails with `QueueFull` once `queue_size` tasks wait
//! - **Retry with backoff**: transient failures wait out a linear or exponential
//!   delay off the worker pool, measured on the queue clock; timeouts count as
//!   transient
//! - **Cooperative cancellation**: each task carries a `CancellationToken`
//! - **Panic isolation**: a panicking processor fails its task, not its worker
//! - **Live metrics**: lock-free counters plus a sampled throughput history
//! - **Deterministic time**: the clock is injectable for tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use prometheus_lanes::config::SchedulerConfig;
//! use prometheus_lanes::core::{processor_fn, QueuedTask, TaskError, TaskQueue};
//!
//! let queue = TaskQueue::builder(SchedulerConfig::from_env()?)
//!     .with_processor(processor_fn(|url: String, ctx| async move {
//!         fetch(&url, ctx.cancel).await.map_err(TaskError::from)
//!     }))
//!     .build()?;
//!
//! queue.start()?;
//! queue.push(QueuedTask::new("crawl-1", "https://example.com".into()).with_priority(5))?;
//! queue.push(QueuedTask::new("crawl-2", "https://example.org".into()))?;
//!
//! let metrics = queue.metrics();
//! queue.stop(Duration::from_secs(10));
//! ```
//!
//! For complete examples, see `tests/task_queue_test.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task model, worker pool, dispatcher, retry policy, and metrics.
pub mod core;
/// Configuration models for the scheduler and its worker pool.
pub mod config;
/// Builders to construct task queues from configuration.
pub mod builders;
/// Admission lanes.
pub mod infra;
/// Shared utilities.
pub mod util;
