//! `WorkerPool` backed by OS threads.
//!
//! Each worker owns a single-threaded tokio runtime so async executors can use
//! timers and cancellation without touching the caller's runtime.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on channel recv; shutdown waits on a Condvar
//! - **Non-blocking intake**: `submit` uses `try_send` and reports `QueueFull`
//! - **Drain on close**: dropping the sender lets workers finish what is queued

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::{Settlement, WorkerExecutor};
use crate::core::wake::Wakeup;
use crate::core::TaskError;
use crate::util::telemetry::panic_message;

use super::{PoolCounters, PoolError, PoolStats, WorkerTask};

/// Count of live worker threads, paired with a Condvar for shutdown waits.
type LiveWorkers = Arc<(Mutex<usize>, Condvar)>;

/// Fixed-size pool of worker threads fed by one bounded channel.
///
/// # Lifecycle
///
/// `new` validates the configuration and creates the channel, `start` spawns
/// the workers, `shutdown` closes intake and waits (up to a deadline) for the
/// workers to drain. Tasks may be submitted before `start`; they wait in the
/// channel.
pub struct WorkerPool<J, E>
where
    J: Send + Sync + 'static,
    E: WorkerExecutor<J>,
{
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Executor cloned into every worker.
    executor: E,

    /// Task sender. `None` once the pool is shut down.
    task_tx: Mutex<Option<Sender<WorkerTask<J>>>>,

    /// Receiver cloned into every worker; also used to measure channel depth.
    task_rx: Receiver<WorkerTask<J>>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Set once `start` has spawned the workers.
    started: AtomicBool,

    /// Shutdown flag (lock-free atomic).
    shutdown: AtomicBool,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Live worker count for deadline-bounded shutdown.
    live: LiveWorkers,

    /// Signaled whenever a channel slot or a worker frees up.
    wakeup: Option<Arc<Wakeup>>,
}

impl<J, E> WorkerPool<J, E>
where
    J: Send + Sync + 'static,
    E: WorkerExecutor<J>,
{
    /// Create a pool. No threads are spawned until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: WorkerPoolConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = bounded::<WorkerTask<J>>(config.queue_capacity);

        Ok(Self {
            config,
            executor,
            task_tx: Mutex::new(Some(task_tx)),
            task_rx,
            counters: Arc::new(PoolCounters::default()),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            live: Arc::new((Mutex::new(0), Condvar::new())),
            wakeup: None,
        })
    }

    /// Signal `wakeup` whenever the pool gains spare capacity.
    #[must_use]
    pub fn with_wakeup(mut self, wakeup: Arc<Wakeup>) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    /// Spawn the worker threads. Calling `start` again is a no-op.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    /// - `PoolError::Internal` if a worker thread could not be spawned
    pub fn start(&self) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Worker pool already started");
            return Ok(());
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.worker_count {
            *self.live.0.lock() += 1;
            let ctx = WorkerContext {
                worker_id,
                task_rx: self.task_rx.clone(),
                executor: self.executor.clone(),
                counters: Arc::clone(&self.counters),
                live: Arc::clone(&self.live),
                wakeup: self.wakeup.clone(),
                task_timeout: self.config.task_timeout,
            };
            match spawn_worker(ctx, &self.config) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    *self.live.0.lock() -= 1;
                    error!(worker_id = worker_id, error = %e, "Failed to spawn worker thread");
                    return Err(PoolError::Internal(format!("spawn worker {worker_id}: {e}")));
                }
            }
        }

        info!(
            worker_count = self.config.worker_count,
            queue_capacity = self.config.queue_capacity,
            task_timeout_ms = u64::try_from(self.config.task_timeout.as_millis()).unwrap_or(u64::MAX),
            "WorkerPool started"
        );
        Ok(())
    }

    /// Submit a task without blocking.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the ready channel is at capacity
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn submit(&self, task: WorkerTask<J>) -> Result<(), PoolError> {
        self.try_submit(task).map_err(|(_, err)| err)
    }

    /// Like [`submit`](Self::submit), but a rejected task is handed back so
    /// the caller can requeue it.
    ///
    /// # Errors
    ///
    /// Returns the task together with the reason it was rejected.
    pub fn try_submit(&self, task: WorkerTask<J>) -> Result<(), (WorkerTask<J>, PoolError)> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err((task, PoolError::PoolShutdown));
        }

        let task_tx_guard = self.task_tx.lock();
        let Some(task_tx) = task_tx_guard.as_ref() else {
            return Err((task, PoolError::PoolShutdown));
        };

        let task_id = task.id.clone();
        // Count before sending so a fast worker never decrements below zero.
        self.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
        match task_tx.try_send(task) {
            Ok(()) => {
                self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %task_id, "Task submitted to worker pool");
                Ok(())
            }
            Err(TrySendError::Full(task)) => {
                self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                debug!(task_id = %task_id, "Worker pool queue is full");
                Err((task, PoolError::QueueFull))
            }
            Err(TrySendError::Disconnected(task)) => {
                self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                Err((task, PoolError::PoolShutdown))
            }
        }
    }

    /// Number of tasks `submit` would currently accept.
    #[must_use]
    pub fn spare_capacity(&self) -> usize {
        if self.shutdown.load(Ordering::Acquire) {
            return 0;
        }
        self.config.queue_capacity.saturating_sub(self.task_rx.len())
    }

    /// True when every worker is busy or the ready channel is full.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        let active = self.counters.active_tasks.load(Ordering::Relaxed);
        let pending = self.task_rx.len();
        active >= self.config.worker_count as u64 || pending >= self.config.queue_capacity
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Number of worker threads this pool runs.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters
            .snapshot(self.config.worker_count, self.config.queue_capacity)
    }

    /// Close intake and wait up to `timeout` for the workers to drain.
    ///
    /// Workers finish everything already in the channel before exiting.
    /// Returns `true` if all workers exited in time. On timeout the remaining
    /// workers are detached and keep running until their current task returns;
    /// calling `shutdown` again waits for them anew.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            info!("Shutting down worker pool");
            // Dropping the sender unblocks idle workers once the channel is empty.
            *self.task_tx.lock() = None;
        }

        let deadline = Instant::now() + timeout;
        {
            let (count, condvar) = &*self.live;
            let mut live = count.lock();
            while *live > 0 {
                if condvar.wait_until(&mut live, deadline).timed_out() && *live > 0 {
                    warn!(remaining = *live, "Workers did not drain before deadline - detaching");
                    return false;
                }
            }
        }

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                warn!(worker_id = idx, "Worker panicked");
            }
        }
        if worker_count > 0 {
            info!(worker_count = worker_count, "Worker pool shut down complete");
        }
        true
    }
}

impl<J, E> Drop for WorkerPool<J, E>
where
    J: Send + Sync + 'static,
    E: WorkerExecutor<J>,
{
    fn drop(&mut self) {
        // Close intake but don't join; explicit shutdown() is the graceful path.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.task_tx.lock() = None;
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

/// Everything a worker thread owns.
struct WorkerContext<J, E> {
    worker_id: usize,
    task_rx: Receiver<WorkerTask<J>>,
    executor: E,
    counters: Arc<PoolCounters>,
    live: LiveWorkers,
    wakeup: Option<Arc<Wakeup>>,
    task_timeout: Duration,
}

impl<J, E> WorkerContext<J, E> {
    fn notify(&self) {
        if let Some(wakeup) = &self.wakeup {
            wakeup.notify();
        }
    }
}

/// Decrements the live count when a worker thread exits, even by panic.
struct ExitGuard(LiveWorkers);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let (count, condvar) = &*self.0;
        let mut live = count.lock();
        *live = live.saturating_sub(1);
        condvar.notify_all();
    }
}

fn spawn_worker<J, E>(
    ctx: WorkerContext<J, E>,
    config: &WorkerPoolConfig,
) -> std::io::Result<JoinHandle<()>>
where
    J: Send + Sync + 'static,
    E: WorkerExecutor<J>,
{
    thread::Builder::new()
        .name(format!("{}-{}", config.thread_name_prefix, ctx.worker_id))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            let _exit = ExitGuard(Arc::clone(&ctx.live));
            let worker_id = ctx.worker_id;
            debug!(worker_id = worker_id, "Worker thread started");

            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id = worker_id, error = %e, "Failed to create worker runtime");
                    return;
                }
            };

            // recv() returns Err only once the sender is gone and the channel is empty.
            while let Ok(task) = ctx.task_rx.recv() {
                ctx.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                ctx.counters.active_tasks.fetch_add(1, Ordering::Relaxed);
                ctx.notify();

                let task_id = task.id.clone();
                debug!(worker_id = worker_id, task_id = %task_id, "Worker executing task");

                let started = Instant::now();
                let finish = rt.block_on(run_task(&ctx, task));
                let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

                ctx.counters.processing_time_ns.fetch_add(elapsed, Ordering::Relaxed);
                ctx.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
                let counter = match finish {
                    Finish::Succeeded => &ctx.counters.completed_tasks,
                    Finish::Failed => &ctx.counters.failed_tasks,
                    Finish::Deferred => &ctx.counters.retried_attempts,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id = worker_id, task_id = %task_id, ?finish, "Worker finished task");
                ctx.notify();
            }

            debug!(worker_id = worker_id, "Worker thread exiting");
        })
}

/// How a worker's turn with a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Succeeded,
    Failed,
    Deferred,
}

/// Run one attempt of a task and settle it.
async fn run_task<J, E>(ctx: &WorkerContext<J, E>, task: WorkerTask<J>) -> Finish
where
    J: Send + Sync + 'static,
    E: WorkerExecutor<J>,
{
    let WorkerTask { id, job, cancel } = task;
    let (outcome, elapsed) = if cancel.is_cancelled() {
        (Err(TaskError::Canceled), Duration::ZERO)
    } else {
        let started = Instant::now();
        let outcome = run_attempt(ctx, &id, &job, &cancel).await;
        (outcome, started.elapsed())
    };
    if let Err(e) = &outcome {
        debug!(worker_id = ctx.worker_id, task_id = %id, error = %e, "Attempt failed");
    }
    let succeeded = outcome.is_ok();

    match ctx.executor.settle(job, outcome, elapsed) {
        Settlement::Deferred => Finish::Deferred,
        Settlement::Done if succeeded => Finish::Succeeded,
        Settlement::Done => Finish::Failed,
    }
}

/// One attempt under the pool timeout, with panics converted to errors.
///
/// A current-thread runtime cannot preempt an executor that blocks without
/// yielding, so a result that arrives after the deadline is still a timeout.
async fn run_attempt<J, E>(
    ctx: &WorkerContext<J, E>,
    id: &str,
    job: &J,
    cancel: &CancellationToken,
) -> Result<(), TaskError>
where
    J: Send + Sync + 'static,
    E: WorkerExecutor<J>,
{
    let started = Instant::now();
    let attempt = AssertUnwindSafe(ctx.executor.execute(job, cancel)).catch_unwind();
    match tokio::time::timeout(ctx.task_timeout, attempt).await {
        Ok(Ok(_)) if started.elapsed() > ctx.task_timeout => {
            warn!(worker_id = ctx.worker_id, task_id = %id, "Task attempt overran its timeout");
            Err(TaskError::Timeout)
        }
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => {
            ctx.counters.panicked_attempts.fetch_add(1, Ordering::Relaxed);
            let msg = panic_message(panic.as_ref());
            error!(worker_id = ctx.worker_id, task_id = %id, panic = %msg, "Task panicked");
            Err(TaskError::Panicked(msg))
        }
        Err(_) => {
            warn!(worker_id = ctx.worker_id, task_id = %id, "Task attempt timed out");
            Err(TaskError::Timeout)
        }
    }
}
