//! Execution traits: the caller-facing processor and the worker-facing executor.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{TaskError, TaskId};

/// Per-attempt information handed to a processor.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task identifier.
    pub task_id: TaskId,
    /// Task type label.
    pub task_type: String,
    /// Zero for the first execution, `n` for the n-th retry.
    pub attempt: u32,
    /// Fired when the task is canceled. Long-running processors should watch it;
    /// the scheduler cannot interrupt a processor that ignores it.
    pub cancel: CancellationToken,
}

impl TaskContext {
    /// Whether the task has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Business logic run for each task.
///
/// The payload is cloned for every attempt so retries see the original data.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_lanes::core::{TaskContext, TaskError, TaskProcessor};
///
/// struct Mailer;
///
/// #[async_trait]
/// impl TaskProcessor<String> for Mailer {
///     async fn process(&self, to: String, ctx: TaskContext) -> Result<(), TaskError> {
///         tokio::select! {
///             r = send(&to) => r.map_err(TaskError::from),
///             () = ctx.cancel.cancelled() => Err(TaskError::Canceled),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait TaskProcessor<P>: Send + Sync + 'static {
    /// Execute one attempt of a task.
    async fn process(&self, payload: P, ctx: TaskContext) -> Result<(), TaskError>;
}

/// Adapter turning an async closure into a [`TaskProcessor`].
pub struct FnProcessor<P, F> {
    f: F,
    _payload: PhantomData<fn(P)>,
}

impl<P, F> FnProcessor<P, F> {
    /// Wrap a closure.
    pub const fn new(f: F) -> Self {
        Self {
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F, Fut> TaskProcessor<P> for FnProcessor<P, F>
where
    P: Send + 'static,
    F: Fn(P, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn process(&self, payload: P, ctx: TaskContext) -> Result<(), TaskError> {
        (self.f)(payload, ctx).await
    }
}

/// Box an async closure as a shareable processor.
pub fn processor_fn<P, F, Fut>(f: F) -> Arc<dyn TaskProcessor<P>>
where
    P: Send + 'static,
    F: Fn(P, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(FnProcessor::new(f))
}

/// What a worker does after an attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The job is finished; the worker moves on.
    Done,
    /// The executor kept the job to run it again later. The worker is
    /// released right away and never sleeps through a backoff.
    Deferred,
}

/// Executor driven by a [`WorkerPool`](crate::core::WorkerPool).
///
/// `execute` runs a single attempt; the pool wraps it with the configured
/// timeout and panic recovery, then hands the job to `settle`.
///
/// # Threading
///
/// Called from a dedicated worker thread with its own single-threaded tokio
/// runtime, so blocking inside `execute` only stalls that worker.
#[async_trait]
pub trait WorkerExecutor<J>: Send + Sync + Clone + 'static
where
    J: Send + Sync + 'static,
{
    /// Run one attempt of `job`.
    async fn execute(&self, job: &J, cancel: &CancellationToken) -> Result<(), TaskError>;

    /// Record the outcome of an attempt. Returning
    /// [`Settlement::Deferred`] means the executor took ownership of `job`
    /// for a later attempt.
    ///
    /// The default finishes the job regardless of the outcome.
    fn settle(&self, job: J, outcome: Result<(), TaskError>, elapsed: Duration) -> Settlement {
        let _ = (job, outcome, elapsed);
        Settlement::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_processor_runs_closure() {
        let processor = processor_fn(|n: u32, ctx: TaskContext| async move {
            if n == ctx.attempt {
                Ok(())
            } else {
                Err(TaskError::failed("mismatch"))
            }
        });
        let ctx = TaskContext {
            task_id: "t".into(),
            task_type: String::new(),
            attempt: 2,
            cancel: CancellationToken::new(),
        };
        assert!(processor.process(2, ctx.clone()).await.is_ok());
        assert!(processor.process(1, ctx).await.is_err());
    }
}
