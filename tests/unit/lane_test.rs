//! Tests for lanes through the shared `Lane` trait

use prometheus_lanes::core::{LaneKind, QueuedTask, SchedulerError};
use prometheus_lanes::infra::{FifoQueue, Lane, PriorityQueue, TimerQueue};

fn lanes() -> Vec<Box<dyn Lane<u8>>> {
    vec![
        Box::new(FifoQueue::new(2)),
        Box::new(PriorityQueue::new(2, 10)),
        Box::new(TimerQueue::new(2)),
    ]
}

fn task_for(kind: LaneKind, id: &str) -> QueuedTask<u8> {
    let task = QueuedTask::new(id, 0);
    match kind {
        LaneKind::Immediate => task,
        LaneKind::Priority => task.with_priority(3),
        LaneKind::Timer => task.with_trigger_at_ms(42),
    }
}

#[test]
fn test_every_lane_enforces_capacity_and_uniqueness() {
    for lane in lanes() {
        let kind = lane.kind();
        assert_eq!(lane.capacity(), 2);
        assert!(lane.is_empty());

        lane.push(task_for(kind, "a")).unwrap();
        assert!(matches!(
            lane.push(task_for(kind, "a")),
            Err(SchedulerError::DuplicateTask(_))
        ));
        lane.push(task_for(kind, "b")).unwrap();
        assert!(matches!(
            lane.push(task_for(kind, "c")),
            Err(SchedulerError::QueueFull(_))
        ));
        assert_eq!(lane.len(), 2);
    }
}

#[test]
fn test_every_lane_cancels_by_id() {
    for lane in lanes() {
        let kind = lane.kind();
        lane.push(task_for(kind, "a")).unwrap();
        lane.push(task_for(kind, "b")).unwrap();

        assert_eq!(lane.cancel("a").map(|t| t.id), Some("a".to_string()));
        assert!(lane.cancel("a").is_none());
        assert!(!lane.contains("a"));
        assert!(lane.contains("b"));
        assert_eq!(lane.len(), 1);

        lane.push(task_for(kind, "a")).unwrap();
        assert_eq!(lane.len(), 2);
    }
}
