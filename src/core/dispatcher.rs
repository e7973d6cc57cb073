//! Dispatcher and metrics sampler loops.
//!
//! The dispatcher is the only consumer of the three lanes and the retry
//! heap. Each tick it asks the pool how many tasks it can take and fills that
//! budget from due retries first, then due timers, then the priority lane,
//! then the immediate lane. Tasks the pool rejects go back to the head of
//! where they came from.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::core::audit::AuditAction;
use crate::core::metrics::Metrics;
use crate::core::task_queue::{wait_ns, LanePool, Shared};
use crate::core::{LaneKind, PoolError, QueuedTask, TaskStatus, WorkerTask};

/// Where the dispatcher takes tasks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Tasks whose retry delay has elapsed. Not counted in `queued`.
    Retries,
    Lane(LaneKind),
}

/// Sources in dispatch precedence order.
const PRECEDENCE: [Source; 4] = [
    Source::Retries,
    Source::Lane(LaneKind::Timer),
    Source::Lane(LaneKind::Priority),
    Source::Lane(LaneKind::Immediate),
];

pub(crate) struct Dispatcher<P>
where
    P: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<P>>,
    pool: Arc<LanePool<P>>,
}

impl<P> Dispatcher<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub(crate) const fn new(shared: Arc<Shared<P>>, pool: Arc<LanePool<P>>) -> Self {
        Self { shared, pool }
    }

    /// Dispatch until the wake signal is shut down.
    pub(crate) fn run(&self) {
        debug!("Dispatcher started");
        loop {
            let dispatched = self.dispatch_once();
            if dispatched > 0 {
                trace!(dispatched, "Dispatch tick");
            }
            if !self.shared.wakeup.wait(self.next_wait()) {
                break;
            }
        }
        debug!("Dispatcher exiting");
    }

    /// Run one dispatch tick. Returns the number of tasks handed to the pool.
    pub(crate) fn dispatch_once(&self) -> usize {
        let mut spare = self.pool.spare_capacity();
        if spare == 0 {
            return 0;
        }

        let shared = &self.shared;
        let now = shared.clock.now_ms();
        let mut events = Vec::new();
        let mut dispatched = 0;

        // Held across pop and submit so a concurrent cancel sees either a
        // waiting task where it left it or a running one, never neither.
        let mut registry = shared.registry.lock();
        for source in PRECEDENCE {
            if spare == 0 {
                break;
            }
            let counted = source != Source::Retries;
            let batch = self.take(source, now, spare);
            let mut rest = batch.into_iter();
            while let Some(task) = rest.next() {
                if counted {
                    shared.queued.fetch_sub(1, Ordering::AcqRel);
                }
                let id = task.id.clone();
                let wait = wait_ns(task.enqueued_at_ms, now);
                let token = task.cancel_token().clone();

                match self.pool.try_submit(WorkerTask::new(id.clone(), task).with_cancel(token)) {
                    Ok(()) => {
                        spare -= 1;
                        dispatched += 1;
                        if counted {
                            Metrics::incr(&shared.metrics.dequeued);
                            shared.metrics.wait_time_ns.fetch_add(wait, Ordering::Relaxed);
                        }
                        if let Some(record) = registry.records.get_mut(&id) {
                            if record.transition(&id, TaskStatus::Running) {
                                record.started_at_ms.get_or_insert(now);
                                events.push(record.audit_event(&id, AuditAction::Dispatch, now));
                            }
                        }
                    }
                    Err((rejected, err)) => {
                        if !matches!(err, PoolError::QueueFull) {
                            debug!(task_id = %id, error = %err, "Worker pool refused task");
                        }
                        let mut back = vec![rejected.job];
                        back.extend(rest.by_ref());
                        if counted {
                            shared.queued.fetch_add(back.len(), Ordering::AcqRel);
                        }
                        self.restore(source, back);
                        spare = 0;
                        break;
                    }
                }
            }
        }
        drop(registry);

        for event in events {
            shared.audit.record(event);
        }
        dispatched
    }

    fn take(&self, source: Source, now: u128, limit: usize) -> Vec<QueuedTask<P>> {
        match source {
            Source::Retries => self.shared.retries.due_tasks_limit(now, limit),
            Source::Lane(LaneKind::Timer) => self.shared.timers.due_tasks_limit(now, limit),
            Source::Lane(LaneKind::Priority) => self.shared.priority.pop_batch(limit),
            Source::Lane(LaneKind::Immediate) => self.shared.immediate.pop_batch(limit),
        }
    }

    fn restore(&self, source: Source, tasks: Vec<QueuedTask<P>>) {
        match source {
            Source::Retries => self.shared.retries.restore(tasks),
            Source::Lane(LaneKind::Timer) => self.shared.timers.restore(tasks),
            Source::Lane(LaneKind::Priority) => self.shared.priority.restore(tasks),
            Source::Lane(LaneKind::Immediate) => self.shared.immediate.restore(tasks),
        }
    }

    /// Sleep until the next tick, or until the earliest timer or retry is
    /// due if that comes first. Push, retry scheduling and pool capacity
    /// changes wake the loop early.
    fn next_wait(&self) -> Duration {
        let tick = self.shared.config.dispatch_interval();
        let next_due = [self.shared.timers.next_due_ms(), self.shared.retries.next_due_ms()]
            .into_iter()
            .flatten()
            .min();
        let Some(due) = next_due else {
            return tick;
        };
        let now = self.shared.clock.now_ms();
        if due <= now {
            // Already due; only blocked on pool capacity, which notifies.
            return tick;
        }
        let until_due = u64::try_from(due - now).unwrap_or(u64::MAX);
        tick.min(Duration::from_millis(until_due))
    }
}

/// Record a metrics sample every window until the sampler is shut down.
pub(crate) fn sample_metrics<P>(shared: &Shared<P>, pool: &LanePool<P>)
where
    P: Clone + Send + Sync + 'static,
{
    let window = shared.config.metrics_window();
    while shared.sampler.wait(window) {
        let sample = shared.metrics.sample(
            shared.clock.now_ms(),
            window,
            shared.queued.load(Ordering::Acquire),
            pool.stats().active_tasks,
        );
        trace!(
            queue_length = sample.queue_length,
            active_tasks = sample.active_tasks,
            throughput_per_sec = sample.throughput_per_sec,
            "Metrics sample"
        );
    }
}
