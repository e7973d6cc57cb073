//! Error types for admission and execution.

use std::io;

use thiserror::Error;

/// Errors returned synchronously by lane admission and queue control calls.
///
/// These are never retried by the scheduler; the caller decides what to do.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task is malformed (empty id, trigger time in an unusable form, ...).
    #[error("invalid task: {0}")]
    InvalidTask(String),
    /// Capacity of the named lane or of the worker pool is exhausted.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// A task with the same id is already queued or running.
    #[error("duplicate task: {0}")]
    DuplicateTask(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The queue has been stopped.
    #[error("scheduler has been shut down")]
    Shutdown,
    /// Internal failure (thread spawn, runtime construction).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors produced while executing a task.
///
/// Execution errors stay inside the retry state machine; callers see them only
/// as the `last_error` of a task snapshot.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The attempt ran longer than the configured task timeout.
    #[error("task execution timed out")]
    Timeout,
    /// Explicit transient failure; always eligible for retry.
    #[error("temporary failure: {0}")]
    Temporary(String),
    /// The task's cancellation token fired.
    #[error("task canceled")]
    Canceled,
    /// The processor panicked; the panic was caught by the worker.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// Any other processor failure.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl TaskError {
    /// Build a retryable error from any message.
    pub fn temporary(msg: impl Into<String>) -> Self {
        Self::Temporary(msg.into())
    }

    /// Build a non-typed failure from any message.
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{msg}"))
    }

    /// Whether this error should be retried.
    ///
    /// Typed checks come first (timeouts, temporary signals, I/O error kinds);
    /// message heuristics are only consulted for untyped failures.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Temporary(_) => true,
            Self::Canceled | Self::Panicked(_) => false,
            Self::Failed(err) => classify_untyped(err),
        }
    }
}

impl From<io::Error> for TaskError {
    fn from(err: io::Error) -> Self {
        Self::Failed(err.into())
    }
}

fn classify_untyped(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if cause.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if let Some(retryable) = io_kind_retryable(io_err.kind()) {
                return retryable;
            }
        }
        if let Some(task_err) = cause.downcast_ref::<TaskError>() {
            return task_err.is_retryable();
        }
    }
    message_retryable(&err.to_string())
}

const fn io_kind_retryable(kind: io::ErrorKind) -> Option<bool> {
    match kind {
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::BrokenPipe => Some(true),
        io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::InvalidData
        | io::ErrorKind::Unsupported => Some(false),
        _ => None,
    }
}

/// Fallback classification by message text.
fn message_retryable(msg: &str) -> bool {
    const NEVER: &[&str] = &["no such host", "permission denied", "invalid argument"];
    const TRANSIENT: &[&str] = &[
        "connection refused",
        "connection reset",
        "timeout",
        "timed out",
        "temporary",
        "try again",
        "too many requests",
        "service unavailable",
    ];

    let msg = msg.to_ascii_lowercase();
    if NEVER.iter().any(|m| msg.contains(m)) {
        return false;
    }
    TRANSIENT.iter().any(|m| msg.contains(m))
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
