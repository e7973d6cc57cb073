//! Queue-level counters and periodic throughput samples.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Number of samples kept when none is specified.
pub const DEFAULT_SAMPLE_HISTORY: usize = 60;

/// Lock-free counters shared by the queue, its dispatcher, and its workers.
#[derive(Debug)]
pub struct Metrics {
    pub(crate) enqueued: AtomicU64,
    pub(crate) dequeued: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) succeeded: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) retried: AtomicU64,
    pub(crate) canceled: AtomicU64,
    pub(crate) processing_time_ns: AtomicU64,
    pub(crate) wait_time_ns: AtomicU64,
    samples: Mutex<SampleRing>,
}

#[derive(Debug)]
struct SampleRing {
    samples: VecDeque<MetricsSample>,
    max_samples: usize,
    processed_at_last: u64,
}

/// One observation taken by the metrics sampler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSample {
    /// When the sample was taken.
    pub at_ms: u128,
    /// Tasks queued across all lanes.
    pub queue_length: usize,
    /// Tasks executing on workers.
    pub active_tasks: u64,
    /// Attempts finished since the previous sample.
    pub processed_in_window: u64,
    /// `processed_in_window` per second of window.
    pub throughput_per_sec: f64,
}

/// Snapshot returned by [`TaskQueue::metrics`](crate::core::TaskQueue::metrics).
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueMetrics {
    /// Tasks admitted.
    pub enqueued: u64,
    /// Tasks moved from a lane to the worker pool.
    pub dequeued: u64,
    /// Execution attempts finished.
    pub processed: u64,
    /// Tasks completed successfully.
    pub succeeded: u64,
    /// Tasks failed permanently.
    pub failed: u64,
    /// Retries scheduled.
    pub retried: u64,
    /// Tasks canceled.
    pub canceled: u64,
    /// Time spent in execution attempts, in nanoseconds.
    pub processing_time_ns: u64,
    /// Time between admission and dispatch, in nanoseconds.
    pub wait_time_ns: u64,
    /// Tasks queued across all lanes right now.
    pub queue_length: usize,
    /// Tasks executing right now.
    pub active_tasks: u64,
    /// Most recent sampler observation.
    pub latest_sample: Option<MetricsSample>,
}

impl QueueMetrics {
    /// Permanent failures over finished tasks, `0.0` when nothing finished.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let finished = self.succeeded + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }

    /// Mean admission-to-dispatch wait.
    #[must_use]
    pub fn average_wait(&self) -> Duration {
        average(self.wait_time_ns, self.dequeued)
    }

    /// Mean attempt duration.
    #[must_use]
    pub fn average_processing(&self) -> Duration {
        average(self.processing_time_ns, self.processed)
    }
}

fn average(total_ns: u64, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(total_ns / count)
    }
}

pub(crate) fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_HISTORY)
    }
}

impl Metrics {
    /// Create counters keeping at most `max_samples` sampler observations.
    #[must_use]
    pub fn new(max_samples: usize) -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            canceled: AtomicU64::new(0),
            processing_time_ns: AtomicU64::new(0),
            wait_time_ns: AtomicU64::new(0),
            samples: Mutex::new(SampleRing {
                samples: VecDeque::with_capacity(max_samples),
                max_samples: max_samples.max(1),
                processed_at_last: 0,
            }),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_duration(counter: &AtomicU64, d: Duration) {
        counter.fetch_add(duration_ns(d), Ordering::Relaxed);
    }

    /// Take a sampler observation covering the last `window`.
    pub fn sample(
        &self,
        at_ms: u128,
        window: Duration,
        queue_length: usize,
        active_tasks: u64,
    ) -> MetricsSample {
        let processed = self.processed.load(Ordering::Relaxed);
        let mut ring = self.samples.lock();
        let processed_in_window = processed.saturating_sub(ring.processed_at_last);
        ring.processed_at_last = processed;

        let secs = window.as_secs_f64();
        let sample = MetricsSample {
            at_ms,
            queue_length,
            active_tasks,
            processed_in_window,
            throughput_per_sec: if secs > 0.0 {
                processed_in_window as f64 / secs
            } else {
                0.0
            },
        };
        if ring.samples.len() >= ring.max_samples {
            ring.samples.pop_front();
        }
        ring.samples.push_back(sample.clone());
        sample
    }

    /// All retained samples, oldest first.
    #[must_use]
    pub fn samples(&self) -> Vec<MetricsSample> {
        self.samples.lock().samples.iter().cloned().collect()
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self, queue_length: usize, active_tasks: u64) -> QueueMetrics {
        QueueMetrics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            processing_time_ns: self.processing_time_ns.load(Ordering::Relaxed),
            wait_time_ns: self.wait_time_ns.load(Ordering::Relaxed),
            queue_length,
            active_tasks,
            latest_sample: self.samples.lock().samples.back().cloned(),
        }
    }
}
