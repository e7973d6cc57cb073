//! Retry policy: who gets retried and how long to wait.

use std::time::Duration;

use crate::config::{BackoffKind, SchedulerConfig};
use crate::core::TaskError;

/// Backoff curve plus a ceiling on exponential growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Shape of the delay curve.
    pub backoff: BackoffKind,
    /// Ceiling on exponential growth. Never pulls a delay below the linear
    /// floor of `attempt * base`.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Build a policy.
    #[must_use]
    pub const fn new(backoff: BackoffKind, max_backoff: Duration) -> Self {
        Self {
            backoff,
            max_backoff,
        }
    }

    /// Policy described by a scheduler configuration.
    #[must_use]
    pub const fn from_config(cfg: &SchedulerConfig) -> Self {
        Self::new(cfg.backoff, cfg.max_backoff())
    }

    /// Delay before retry number `attempt` (1-based) for a task whose base
    /// delay is `base`. Non-decreasing in `attempt` and never shorter than
    /// `attempt * base`.
    #[must_use]
    pub fn delay(&self, attempt: u32, base: Duration) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = match self.backoff {
            BackoffKind::Linear => attempt,
            BackoffKind::Exponential => 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX),
        };
        let floor = base.saturating_mul(attempt);
        base.saturating_mul(factor).min(self.max_backoff.max(floor))
    }

    /// Whether a failed attempt should be retried.
    #[must_use]
    pub fn should_retry(&self, err: &TaskError, retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries && err.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
