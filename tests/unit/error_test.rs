//! Tests for error types

use std::io;

use prometheus_lanes::core::{PoolError, SchedulerError, TaskError};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("priority".to_string());
    assert_eq!(format!("{}", err), "queue full: priority");
}

#[test]
fn test_duplicate_task_error() {
    let err = SchedulerError::DuplicateTask("job-7".to_string());
    assert_eq!(format!("{}", err), "duplicate task: job-7");
}

#[test]
fn test_shutdown_error() {
    assert_eq!(format!("{}", SchedulerError::Shutdown), "scheduler has been shut down");
}

#[test]
fn test_pool_error_conversion() {
    let err: SchedulerError = PoolError::InvalidConfig("worker_count must be greater than 0".into()).into();
    assert_eq!(
        format!("{}", err),
        "invalid configuration: worker_count must be greater than 0"
    );
}

#[test]
fn test_typed_errors_are_classified() {
    assert!(TaskError::Timeout.is_retryable());
    assert!(TaskError::temporary("rate limited").is_retryable());
    assert!(!TaskError::Canceled.is_retryable());
    assert!(!TaskError::Panicked("boom".into()).is_retryable());
}

#[test]
fn test_io_errors_are_classified_by_kind() {
    let refused = TaskError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "dial"));
    assert!(refused.is_retryable());

    let denied = TaskError::from(io::Error::new(io::ErrorKind::PermissionDenied, "timeout"));
    assert!(!denied.is_retryable());
}

#[test]
fn test_message_heuristics_are_a_fallback() {
    assert!(TaskError::failed("connection refused by upstream").is_retryable());
    assert!(TaskError::failed("503 Service Unavailable").is_retryable());
    assert!(!TaskError::failed("lookup api.internal: no such host").is_retryable());
    assert!(!TaskError::failed("invalid argument: temporary=yes").is_retryable());
    assert!(!TaskError::failed("schema mismatch").is_retryable());
}

#[test]
fn test_wrapped_task_error_keeps_its_class() {
    let inner = anyhow::Error::new(TaskError::Timeout).context("calling billing");
    assert!(TaskError::Failed(inner).is_retryable());
}
