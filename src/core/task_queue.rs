//! Multi-lane task queue.
//!
//! `TaskQueue` routes every pushed task to one of three lanes, then a single
//! dispatcher thread moves ready tasks into the worker pool with the
//! precedence due retries > due timers > priority levels (high to low) >
//! immediate FIFO. Retries and cancellation are tracked per task in a
//! registry that outlives lane membership, so callers can look up a task
//! after it finished.
//!
//! A failed attempt that earns a retry leaves its worker at once. It waits in
//! a retry heap keyed by the queue clock, outside the lane capacity count,
//! until the dispatcher picks it up again.
//!
//! # Lock order
//!
//! `registry` is always taken before any lane lock. Workers only ever take
//! `registry`, and never while holding a pool lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builders::TaskQueueBuilder;
use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, TracingAuditSink};
use crate::core::dispatcher::{self, Dispatcher};
use crate::core::executor::{Settlement, TaskContext, TaskProcessor, WorkerExecutor};
use crate::core::metrics::{duration_ns, Metrics, QueueMetrics, DEFAULT_SAMPLE_HISTORY};
use crate::core::retry::RetryPolicy;
use crate::core::wake::Wakeup;
use crate::core::{
    LaneKind, PoolStats, QueuedTask, SchedulerError, TaskError, TaskId, TaskSnapshot, TaskStatus,
    WorkerPool,
};
use crate::infra::queue::{FifoQueue, Lane, PriorityQueue, TimerQueue};
use crate::util::clock::{Clock, SystemClock};

/// Worker pool type driven by a queue of payload `P`.
pub(crate) type LanePool<P> = WorkerPool<QueuedTask<P>, TaskRunner<P>>;

/// Bookkeeping kept for every task from admission until it is evicted.
#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub task_type: String,
    pub lane: LaneKind,
    pub priority: i32,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub enqueued_at_ms: u128,
    pub started_at_ms: Option<u128>,
    pub finished_at_ms: Option<u128>,
    pub last_retry_ms: Option<u128>,
    pub cancel: CancellationToken,
    pub admission: u64,
}

impl TaskRecord {
    /// Move to `next` if the lifecycle allows it. An illegal move is logged
    /// and leaves the record untouched.
    pub(crate) fn transition(&mut self, id: &str, next: TaskStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            warn!(task_id = %id, from = %self.status, to = %next, "Refused task status transition");
            false
        }
    }

    fn snapshot(&self, id: &str) -> TaskSnapshot {
        TaskSnapshot {
            id: id.to_string(),
            task_type: self.task_type.clone(),
            lane: self.lane,
            priority: self.priority,
            status: self.status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            last_error: self.last_error.clone(),
            enqueued_at_ms: self.enqueued_at_ms,
            started_at_ms: self.started_at_ms,
            finished_at_ms: self.finished_at_ms,
            last_retry_ms: self.last_retry_ms,
        }
    }

    pub(crate) fn audit_event(&self, id: &str, action: AuditAction, at_ms: u128) -> AuditEvent {
        let mut event = build_audit_event(
            id,
            self.task_type.clone(),
            self.lane,
            action,
            self.retry_count,
            self.last_error.clone(),
        );
        event.created_at_ms = at_ms;
        event
    }
}

/// Task records plus a bounded list of finished ids, oldest first.
#[derive(Debug)]
pub(crate) struct Registry {
    pub records: HashMap<TaskId, TaskRecord>,
    finished: VecDeque<TaskId>,
    retain: usize,
}

impl Registry {
    fn new(retain: usize) -> Self {
        Self {
            records: HashMap::new(),
            finished: VecDeque::new(),
            retain,
        }
    }

    /// Move a record to a terminal status and evict the oldest finished
    /// records beyond the retention limit. Returns `false` if the record is
    /// unknown or the transition is not allowed.
    fn finish(&mut self, id: &str, status: TaskStatus, at_ms: u128) -> bool {
        debug_assert!(status.is_terminal());
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };
        if !record.transition(id, status) {
            return false;
        }
        record.finished_at_ms = Some(at_ms);
        self.finished.push_back(id.to_string());
        while self.finished.len() > self.retain {
            if let Some(old) = self.finished.pop_front() {
                self.records.remove(&old);
            }
        }
        true
    }

    /// Drop a finished record so its id can be admitted again.
    fn forget_finished(&mut self, id: &str) {
        self.records.remove(id);
        self.finished.retain(|f| f != id);
    }
}

/// State shared by the queue handle, the dispatcher, the sampler, and workers.
pub(crate) struct Shared<P> {
    pub config: SchedulerConfig,
    pub clock: Arc<dyn Clock>,
    pub audit: Arc<dyn AuditSink>,
    pub processor: Option<Arc<dyn TaskProcessor<P>>>,
    pub immediate: FifoQueue<P>,
    pub priority: PriorityQueue<P>,
    pub timers: TimerQueue<P>,
    /// Tasks waiting out a retry delay, keyed by retry time. Not part of
    /// `queued`.
    pub retries: TimerQueue<P>,
    pub registry: Mutex<Registry>,
    /// Tasks resident in any lane.
    pub queued: AtomicUsize,
    admissions: AtomicU64,
    pub metrics: Metrics,
    /// Wakes the dispatcher on push and when the pool frees capacity.
    pub wakeup: Arc<Wakeup>,
    /// Stop signal for the metrics sampler.
    pub sampler: Arc<Wakeup>,
    pub retry: RetryPolicy,
}

impl<P> Shared<P> {
    fn lane(&self, kind: LaneKind) -> &dyn Lane<P> {
        match kind {
            LaneKind::Immediate => &self.immediate,
            LaneKind::Priority => &self.priority,
            LaneKind::Timer => &self.timers,
        }
    }

    /// Claim one slot of total queue capacity.
    fn try_reserve(&self) -> bool {
        let limit = self.config.queue_size;
        let mut current = self.queued.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return false;
            }
            match self.queued.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Record of the admission `job` belongs to, if it is still tracked.
    fn record_for<'a>(registry: &'a mut Registry, job: &QueuedTask<P>) -> Option<&'a mut TaskRecord> {
        registry
            .records
            .get_mut(&job.id)
            .filter(|record| record.admission == job.admission)
    }

    fn release(&self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }

    /// Apply the outcome of one attempt to the task's record.
    ///
    /// A retryable failure parks the task in the retry heap and returns
    /// [`Settlement::Deferred`]; everything else finishes the task.
    fn settle(&self, mut job: QueuedTask<P>, outcome: Result<(), TaskError>, elapsed: Duration) -> Settlement {
        Metrics::incr(&self.metrics.processed);
        Metrics::add_duration(&self.metrics.processing_time_ns, elapsed);
        let now = self.clock.now_ms();

        let mut registry = self.registry.lock();
        let Some(record) = Self::record_for(&mut registry, &job) else {
            return Settlement::Done;
        };
        if record.status.is_terminal() {
            // Canceled by the caller while the attempt was running.
            return Settlement::Done;
        }

        let (status, event) = match outcome {
            Ok(()) => {
                Metrics::incr(&self.metrics.succeeded);
                (TaskStatus::Completed, record.audit_event(&job.id, AuditAction::Complete, now))
            }
            Err(TaskError::Canceled) => {
                Metrics::incr(&self.metrics.canceled);
                record.cancel.cancel();
                (TaskStatus::Canceled, record.audit_event(&job.id, AuditAction::Cancel, now))
            }
            Err(err) => {
                record.last_error = Some(err.to_string());
                let max_retries = job.max_retries.unwrap_or(self.config.max_retries);
                if self.retry.should_retry(&err, job.retry_count, max_retries)
                    && record.transition(&job.id, TaskStatus::Retrying)
                {
                    job.retry_count += 1;
                    job.last_retry_ms = Some(now);
                    record.retry_count = job.retry_count;
                    record.last_retry_ms = Some(now);

                    let base = job.retry_delay.unwrap_or_else(|| self.config.retry_delay());
                    let delay = self.retry.delay(job.retry_count, base);
                    // The clock ticks in whole milliseconds; one extra tick
                    // keeps the real wait at or above `delay`.
                    job.retry_at_ms = Some(now.saturating_add(delay.as_millis()).saturating_add(1));
                    debug!(
                        task_id = %job.id,
                        attempt = job.retry_count,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying task"
                    );
                    let event = record.audit_event(&job.id, AuditAction::Retry, now);
                    let id = job.id.clone();
                    match self.retries.push(job) {
                        Ok(()) => {
                            Metrics::incr(&self.metrics.retried);
                            drop(registry);
                            self.audit.record(event);
                            self.wakeup.notify();
                            return Settlement::Deferred;
                        }
                        Err(err) => {
                            error!(task_id = %id, error = %err, "Could not park task for retry");
                            Metrics::incr(&self.metrics.failed);
                            let event = registry
                                .records
                                .get(&id)
                                .map(|record| record.audit_event(&id, AuditAction::Fail, now));
                            registry.finish(&id, TaskStatus::Failed, now);
                            drop(registry);
                            if let Some(event) = event {
                                self.audit.record(event);
                            }
                            return Settlement::Done;
                        }
                    }
                }
                Metrics::incr(&self.metrics.failed);
                (TaskStatus::Failed, record.audit_event(&job.id, AuditAction::Fail, now))
            }
        };
        registry.finish(&job.id, status, now);
        drop(registry);
        self.audit.record(event);
        Settlement::Done
    }
}

/// Worker-side executor: resolves the processor and settles each attempt.
pub(crate) struct TaskRunner<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for TaskRunner<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl<P> WorkerExecutor<QueuedTask<P>> for TaskRunner<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn execute(&self, job: &QueuedTask<P>, cancel: &CancellationToken) -> Result<(), TaskError> {
        let Some(processor) = job.processor.clone().or_else(|| self.shared.processor.clone()) else {
            return Err(TaskError::failed(format!("no processor for task {}", job.id)));
        };
        let ctx = TaskContext {
            task_id: job.id.clone(),
            task_type: job.task_type.clone(),
            attempt: job.retry_count,
            cancel: cancel.clone(),
        };
        processor.process(job.payload.clone(), ctx).await
    }

    fn settle(&self, job: QueuedTask<P>, outcome: Result<(), TaskError>, elapsed: Duration) -> Settlement {
        self.shared.settle(job, outcome, elapsed)
    }
}

/// In-process scheduler with immediate, priority, and timer lanes.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_lanes::config::SchedulerConfig;
/// use prometheus_lanes::core::{processor_fn, QueuedTask, TaskQueue};
///
/// let queue = TaskQueue::builder(SchedulerConfig::default())
///     .with_processor(processor_fn(|to: String, _ctx| async move { send(&to).await }))
///     .build()?;
/// queue.start()?;
/// queue.push(QueuedTask::new("welcome-42", "ada@example.com".to_string()).with_priority(5))?;
/// ```
pub struct TaskQueue<P>
where
    P: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<P>>,
    pool: Arc<LanePool<P>>,
    started: AtomicBool,
    stopped: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<P> TaskQueue<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create a queue without a default processor; every task must carry one.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::from_parts(config, Arc::new(SystemClock), Arc::new(TracingAuditSink), None)
    }

    /// Start building a queue with a custom clock, audit sink, or default processor.
    #[must_use]
    pub fn builder(config: SchedulerConfig) -> TaskQueueBuilder<P> {
        TaskQueueBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        processor: Option<Arc<dyn TaskProcessor<P>>>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let wakeup = Arc::new(Wakeup::new());
        let shared = Arc::new(Shared {
            clock,
            audit,
            processor,
            immediate: FifoQueue::new(config.queue_size),
            priority: PriorityQueue::new(config.queue_size, config.max_priority),
            timers: TimerQueue::new(config.queue_size),
            retries: TimerQueue::new(usize::MAX),
            registry: Mutex::new(Registry::new(config.retain_finished)),
            queued: AtomicUsize::new(0),
            admissions: AtomicU64::new(0),
            metrics: Metrics::new(DEFAULT_SAMPLE_HISTORY),
            wakeup: Arc::clone(&wakeup),
            sampler: Arc::new(Wakeup::new()),
            retry: RetryPolicy::from_config(&config),
            config,
        });

        let runner = TaskRunner {
            shared: Arc::clone(&shared),
        };
        let pool = WorkerPool::new(shared.config.worker_pool(), runner)?.with_wakeup(wakeup);

        Ok(Self {
            shared,
            pool: Arc::new(pool),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Admit a task to its lane.
    ///
    /// Unset `max_retries` and `retry_delay` take the queue defaults, and the
    /// task gets a fresh cancellation token. Tasks may be pushed before
    /// [`start`](Self::start); they wait in their lane.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidTask` for an empty id, or when neither the
    ///   task nor the queue has a processor
    /// - `SchedulerError::DuplicateTask` if the id is queued or running
    /// - `SchedulerError::QueueFull` if total capacity is exhausted
    /// - `SchedulerError::Shutdown` after [`stop`](Self::stop)
    pub fn push(&self, mut task: QueuedTask<P>) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        if task.id.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("task id must not be empty".into()));
        }
        if task.processor.is_none() && self.shared.processor.is_none() {
            return Err(SchedulerError::InvalidTask(format!(
                "task {} has no processor and the queue has no default",
                task.id
            )));
        }

        let shared = &self.shared;
        let now = shared.clock.now_ms();
        task.max_retries.get_or_insert(shared.config.max_retries);
        task.retry_delay.get_or_insert_with(|| shared.config.retry_delay());
        task.enqueued_at_ms = now;
        task.reset_cancel();
        task.admission = shared.admissions.fetch_add(1, Ordering::Relaxed) + 1;
        if task.trigger_at_ms == Some(0) {
            task.trigger_at_ms = None;
        }
        let lane = task.lane();
        if lane == LaneKind::Priority {
            task.priority = shared.priority.clamp(task.priority);
        }

        let mut registry = shared.registry.lock();
        match registry.records.get(&task.id).map(|r| r.status.is_terminal()) {
            Some(false) => return Err(SchedulerError::DuplicateTask(task.id)),
            Some(true) => registry.forget_finished(&task.id),
            None => {}
        }
        if !shared.try_reserve() {
            debug!(task_id = %task.id, lane = %lane, "Queue full");
            return Err(SchedulerError::QueueFull(lane.to_string()));
        }

        let record = TaskRecord {
            task_type: task.task_type.clone(),
            lane,
            priority: task.priority,
            status: TaskStatus::Pending,
            retry_count: task.retry_count,
            max_retries: task.max_retries.unwrap_or(shared.config.max_retries),
            last_error: None,
            enqueued_at_ms: now,
            started_at_ms: None,
            finished_at_ms: None,
            last_retry_ms: task.last_retry_ms,
            cancel: task.cancel_token().clone(),
            admission: task.admission,
        };
        let id = task.id.clone();
        if let Err(err) = shared.lane(lane).push(task) {
            shared.release();
            return Err(err);
        }
        let event = record.audit_event(&id, AuditAction::Enqueue, now);
        registry.records.insert(id, record);
        drop(registry);

        Metrics::incr(&shared.metrics.enqueued);
        shared.audit.record(event);
        shared.wakeup.notify();
        Ok(())
    }

    /// Push several tasks. Each result is independent; earlier successes are
    /// kept when a later task is rejected.
    pub fn push_batch(&self, tasks: impl IntoIterator<Item = QueuedTask<P>>) -> Vec<Result<(), SchedulerError>> {
        tasks.into_iter().map(|task| self.push(task)).collect()
    }

    /// Cancel a task.
    ///
    /// A pending task is removed from its lane and a retrying task from the
    /// retry heap; a running task has its cancellation token fired. Returns
    /// `false` for unknown ids and for tasks that already finished.
    pub fn cancel(&self, id: &str) -> bool {
        let shared = &self.shared;
        let now = shared.clock.now_ms();
        let mut registry = shared.registry.lock();
        let Some(record) = registry.records.get_mut(id) else {
            return false;
        };
        match record.status {
            status if status.is_terminal() => return false,
            TaskStatus::Pending => {
                if shared.lane(record.lane).cancel(id).is_some() {
                    shared.release();
                } else {
                    warn!(task_id = %id, lane = %record.lane, "Pending task missing from its lane");
                }
            }
            TaskStatus::Retrying => {
                if shared.retries.cancel(id).is_none() {
                    warn!(task_id = %id, "Retrying task missing from the retry heap");
                }
            }
            _ => {}
        }
        record.cancel.cancel();
        let event = record.audit_event(id, AuditAction::Cancel, now);
        registry.finish(id, TaskStatus::Canceled, now);
        drop(registry);

        Metrics::incr(&shared.metrics.canceled);
        shared.audit.record(event);
        true
    }

    /// Move a pending priority-lane task to a new level (clamped). It joins
    /// the back of that level.
    ///
    /// Returns `false` if the task is not waiting in the priority lane.
    pub fn update_priority(&self, id: &str, priority: i32) -> bool {
        let mut registry = self.shared.registry.lock();
        let Some(record) = registry.records.get_mut(id) else {
            return false;
        };
        if record.status != TaskStatus::Pending || record.lane != LaneKind::Priority {
            return false;
        }
        if !self.shared.priority.update_priority(id, priority) {
            return false;
        }
        record.priority = self.shared.priority.clamp(priority);
        true
    }

    /// Start the worker pool, the dispatcher, and the metrics sampler.
    /// Calling `start` again is a no-op.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Shutdown` after [`stop`](Self::stop)
    /// - `SchedulerError::Internal` if a thread could not be spawned
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Task queue already started");
            return Ok(());
        }

        self.pool.start()?;

        let mut threads = self.threads.lock();
        let dispatcher = Dispatcher::new(Arc::clone(&self.shared), Arc::clone(&self.pool));
        threads.push(spawn_named("lanes-dispatcher", move || dispatcher.run())?);

        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(&self.pool);
        threads.push(spawn_named("lanes-metrics", move || dispatcher::sample_metrics(&shared, &pool))?);

        info!(
            workers = self.shared.config.workers,
            queue_size = self.shared.config.queue_size,
            max_priority = self.shared.config.max_priority,
            "Task queue started"
        );
        Ok(())
    }

    /// Stop dispatching, then close the worker pool and wait up to `timeout`
    /// for in-flight tasks to finish.
    ///
    /// Tasks still in a lane stay `Pending` and tasks waiting out a retry stay
    /// `Retrying`. Returns `true` when every worker
    /// exited before the deadline. Safe to call more than once.
    pub fn stop(&self, timeout: Duration) -> bool {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            info!(queued = self.len(), "Stopping task queue");
        }
        self.shared.wakeup.shutdown();
        self.shared.sampler.shutdown();

        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("Background thread panicked");
            }
        }
        self.pool.shutdown(timeout)
    }

    /// Snapshot of queue counters.
    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        self.shared
            .metrics
            .snapshot(self.len(), self.pool.stats().active_tasks)
    }

    /// Statistics of the underlying worker pool.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Look up a queued, running, or recently finished task.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<TaskSnapshot> {
        self.shared
            .registry
            .lock()
            .records
            .get(id)
            .map(|record| record.snapshot(id))
    }

    /// Drop all finished task records. Returns how many were removed.
    pub fn purge_finished(&self) -> usize {
        let mut registry = self.shared.registry.lock();
        let finished: Vec<_> = registry.finished.drain(..).collect();
        for id in &finished {
            registry.records.remove(id);
        }
        finished.len()
    }

    /// Tasks waiting across all lanes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    /// Whether no task is waiting in any lane.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks waiting out a retry delay. They do not count toward
    /// [`len`](Self::len).
    #[must_use]
    pub fn retrying(&self) -> usize {
        self.shared.retries.len()
    }

    /// Per-lane queue lengths.
    #[must_use]
    pub fn lane_lengths(&self) -> Vec<(LaneKind, usize)> {
        [LaneKind::Immediate, LaneKind::Priority, LaneKind::Timer]
            .into_iter()
            .map(|kind| (kind, self.shared.lane(kind).len()))
            .collect()
    }

    /// Configuration the queue was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }
}

impl<P> Drop for TaskQueue<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Background threads exit on their own; the pool closes when its last handle drops.
        self.shared.wakeup.shutdown();
        self.shared.sampler.shutdown();
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>, SchedulerError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| SchedulerError::Internal(format!("spawn {name}: {e}")))
}

pub(crate) fn wait_ns(enqueued_at_ms: u128, now_ms: u128) -> u64 {
    let waited = now_ms.saturating_sub(enqueued_at_ms);
    duration_ns(Duration::from_millis(u64::try_from(waited).unwrap_or(u64::MAX)))
}
