//! Audit sink implementations.
//!
//! Every task lifecycle transition produces one [`AuditEvent`]. The default
//! sink forwards events to `tracing`; the in-memory sink keeps a bounded
//! buffer for tests and local inspection.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::LaneKind;
use crate::util::clock::now_ms;

/// Lifecycle transition recorded by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Admitted to a lane.
    Enqueue,
    /// Handed to the worker pool.
    Dispatch,
    /// Failed attempt scheduled for another try.
    Retry,
    /// Finished successfully.
    Complete,
    /// Failed permanently.
    Fail,
    /// Canceled by the caller.
    Cancel,
}

impl AuditAction {
    /// Action name used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Dispatch => "dispatch",
            Self::Retry => "retry",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: String,
    /// Task type label.
    pub task_type: String,
    /// Lane the task was admitted to.
    pub lane: LaneKind,
    /// Transition recorded.
    pub action: AuditAction,
    /// Retry count at the time of the event.
    pub attempt: u32,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context, typically an error message.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
///
/// Called from the dispatcher and worker threads, so implementations must be
/// cheap and must not block for long.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Sink that turns every event into a structured `tracing` line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let detail = event.detail.as_deref().unwrap_or("");
        match event.action {
            AuditAction::Fail => warn!(
                task_id = %event.task_id,
                task_type = %event.task_type,
                lane = %event.lane,
                attempt = event.attempt,
                error = detail,
                "Task failed"
            ),
            AuditAction::Retry => info!(
                task_id = %event.task_id,
                lane = %event.lane,
                attempt = event.attempt,
                error = detail,
                "Task scheduled for retry"
            ),
            action => debug!(
                task_id = %event.task_id,
                task_type = %event.task_type,
                lane = %event.lane,
                attempt = event.attempt,
                action = %action,
                "Task lifecycle event"
            ),
        }
    }
}

/// In-memory audit sink for testing and dev.
///
/// Clones share the same buffer, so a test can keep one handle and give the
/// other to the queue.
#[derive(Debug, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events: max_events.max(1),
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Actions recorded for one task, oldest first.
    #[must_use]
    pub fn actions_for(&self, task_id: &str) -> Vec<AuditAction> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.action)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event stamped with the wall clock and a fresh id.
pub fn build_audit_event(
    task_id: impl Into<String>,
    task_type: impl Into<String>,
    lane: LaneKind,
    action: AuditAction,
    attempt: u32,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        task_id: task_id.into(),
        task_type: task_type.into(),
        lane,
        action,
        attempt,
        created_at_ms: now_ms(),
        detail,
    }
}
