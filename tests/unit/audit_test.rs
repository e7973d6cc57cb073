//! Tests for audit sink

use prometheus_lanes::core::{
    build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, LaneKind, TracingAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        "task1",
        "email",
        LaneKind::Priority,
        AuditAction::Retry,
        2,
        Some("connection reset".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].task_id, "task1");
    assert_eq!(events[0].lane, LaneKind::Priority);
    assert_eq!(events[0].action, AuditAction::Retry);
    assert_eq!(events[0].attempt, 2);
    assert_eq!(events[0].detail.as_deref(), Some("connection reset"));
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("task1", "", LaneKind::Immediate, AuditAction::Enqueue, 0, None));
    sink.record(build_audit_event("task2", "", LaneKind::Immediate, AuditAction::Enqueue, 0, None));
    sink.record(build_audit_event("task3", "", LaneKind::Immediate, AuditAction::Enqueue, 0, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, "task2"); // First one popped
    assert_eq!(events[1].task_id, "task3");
}

#[test]
fn test_audit_event_serializes() {
    let event = build_audit_event("task1", "report", LaneKind::Timer, AuditAction::Fail, 3, None);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "fail");
    assert_eq!(json["lane"], "timer");
    assert_eq!(json["attempt"], 3);
}

#[test]
fn test_tracing_sink_accepts_every_action() {
    let sink = TracingAuditSink;
    for action in [
        AuditAction::Enqueue,
        AuditAction::Dispatch,
        AuditAction::Retry,
        AuditAction::Complete,
        AuditAction::Fail,
        AuditAction::Cancel,
    ] {
        sink.record(build_audit_event("t", "x", LaneKind::Immediate, action, 0, None));
    }
}
