//! Builder for [`TaskQueue`].

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::audit::{AuditSink, TracingAuditSink};
use crate::core::{SchedulerError, TaskProcessor, TaskQueue};
use crate::util::clock::{Clock, SystemClock};

/// Assembles a [`TaskQueue`] from a [`SchedulerConfig`] plus optional
/// collaborators. Unset collaborators fall back to the system clock and the
/// tracing audit sink; without a default processor every task must carry its own.
pub struct TaskQueueBuilder<P> {
    config: SchedulerConfig,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<dyn AuditSink>>,
    processor: Option<Arc<dyn TaskProcessor<P>>>,
}

impl<P> TaskQueueBuilder<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            clock: None,
            audit: None,
            processor: None,
        }
    }

    /// Time source for trigger times, wait accounting, and audit timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sink receiving one event per task lifecycle transition.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Processor used by tasks that do not carry their own.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn TaskProcessor<P>>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Validate the configuration and build the queue. Nothing runs until
    /// [`TaskQueue::start`].
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the configuration is invalid.
    pub fn build(self) -> Result<TaskQueue<P>, SchedulerError> {
        TaskQueue::from_parts(
            self.config,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            self.processor,
        )
    }
}
