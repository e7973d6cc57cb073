//! Benchmarks for the lanes and the task queue.
//!
//! Benchmarks cover:
//! - Immediate lane push/pop
//! - Priority lane mixed-level push and batched pops
//! - Timer lane inserts in random order and due extraction
//! - Cancel by id from the middle of a lane
//! - End-to-end dispatch through the worker pool

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::hint::black_box;
use std::time::{Duration, Instant};

use prometheus_lanes::config::SchedulerConfig;
use prometheus_lanes::core::{processor_fn, QueuedTask, TaskContext, TaskError, TaskQueue};
use prometheus_lanes::infra::{FifoQueue, Lane, PriorityQueue, TimerQueue};

// ============================================================================
// Helper Functions
// ============================================================================

fn build_task(id: u64) -> QueuedTask<u64> {
    QueuedTask::new(format!("task-{id}"), id).with_type("bench")
}

// ============================================================================
// Lane Benchmarks
// ============================================================================

fn bench_fifo_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_push_pop");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let q = FifoQueue::new(size as usize);
                for i in 0..size {
                    q.push(build_task(i)).unwrap();
                }
                while let Some(task) = q.pop() {
                    black_box(task);
                }
            });
        });
    }
    group.finish();
}

fn bench_priority_mixed_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_mixed_levels");

    for size in [100, 1_000, 5_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let q = PriorityQueue::new(size as usize, 10);

                // Spread tasks over every level
                for i in 0..size {
                    let level = i32::try_from(i % 11).unwrap();
                    q.push(build_task(i).with_priority(level)).unwrap();
                }

                // Drain in dispatcher-sized batches
                let mut count = 0;
                loop {
                    let batch = q.pop_batch(16);
                    if batch.is_empty() {
                        break;
                    }
                    count += batch.len();
                }
                black_box(count);
            });
        });
    }
    group.finish();
}

fn bench_timer_due_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_due_extraction");

    for size in [100, 1_000, 5_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut rng = rand::rng();
            let triggers: Vec<u128> = (0..size).map(|_| rng.random_range(1..10_000)).collect();

            b.iter(|| {
                let q = TimerQueue::new(size as usize);
                for (i, at) in triggers.iter().enumerate() {
                    q.push(build_task(i as u64).with_trigger_at_ms(*at)).unwrap();
                }

                // Advance time in steps, as the dispatcher would
                let mut released = 0;
                for now in (1_000..=10_000).step_by(1_000) {
                    released += q.due_tasks(now).len();
                }
                black_box(released);
            });
        });
    }
    group.finish();
}

fn bench_cancel_by_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel_by_id");

    for size in [100, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let priority = PriorityQueue::new(size as usize, 10);
                let timers = TimerQueue::new(size as usize);
                for i in 0..size {
                    priority.push(build_task(i).with_priority(5)).unwrap();
                    timers.push(build_task(i).with_trigger_at_ms(u128::from(i) + 1)).unwrap();
                }

                // Cancel every other task
                for i in (0..size).step_by(2) {
                    let id = format!("task-{i}");
                    black_box(priority.cancel(&id));
                    black_box(timers.cancel(&id));
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// End-to-End Benchmarks
// ============================================================================

fn bench_end_to_end_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end_dispatch");
    group.sample_size(10);

    for task_count in [100u64, 500] {
        group.throughput(Throughput::Elements(task_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, &task_count| {
                b.iter(|| {
                    let config = SchedulerConfig {
                        workers: 4,
                        queue_size: task_count as usize,
                        dispatch_interval_ms: 10,
                        ..SchedulerConfig::default()
                    };
                    let queue = TaskQueue::builder(config)
                        .with_processor(processor_fn(|n: u64, _ctx: TaskContext| async move {
                            black_box(n);
                            Ok::<(), TaskError>(())
                        }))
                        .build()
                        .unwrap();
                    queue.start().unwrap();

                    // Mix of immediate and priority tasks
                    for i in 0..task_count {
                        let level = i32::try_from(i % 4).unwrap();
                        queue.push(build_task(i).with_priority(level)).unwrap();
                    }

                    let deadline = Instant::now() + Duration::from_secs(30);
                    while queue.metrics().succeeded < task_count && Instant::now() < deadline {
                        std::thread::sleep(Duration::from_micros(200));
                    }
                    queue.stop(Duration::from_secs(5));
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    lane_benches,
    bench_fifo_push_pop,
    bench_priority_mixed_levels,
    bench_timer_due_extraction,
    bench_cancel_by_id
);

criterion_group!(scenario_benches, bench_end_to_end_dispatch);

criterion_main!(lane_benches, scenario_benches);
