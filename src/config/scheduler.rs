//! Task queue configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::WorkerPoolConfig;

/// Environment variable prefix read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "LANES_";

/// Largest accepted `max_priority`. The priority lane allocates one FIFO per
/// level up front.
pub const MAX_PRIORITY_LIMIT: u32 = 255;

/// Shape of the retry delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// `attempt * retry_delay`.
    #[default]
    Linear,
    /// `2^(attempt - 1) * retry_delay`.
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff `{other}`")),
        }
    }
}

/// Root configuration for a [`TaskQueue`](crate::core::TaskQueue).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Maximum number of queued tasks across all lanes.
    pub queue_size: usize,
    /// Per-attempt execution timeout in milliseconds.
    pub task_timeout_ms: u64,
    /// Default retry budget for tasks that do not set one.
    pub max_retries: u32,
    /// Default base retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Highest priority level; levels are `0..=max_priority`, at most
    /// [`MAX_PRIORITY_LIMIT`].
    pub max_priority: u32,
    /// Metrics sampling interval in milliseconds.
    pub metrics_window_ms: u64,
    /// Dispatcher tick in milliseconds.
    pub dispatch_interval_ms: u64,
    /// Ready-channel capacity of the worker pool. Defaults to `workers`.
    pub pool_queue_size: Option<usize>,
    /// Retry delay curve.
    pub backoff: BackoffKind,
    /// Ceiling on exponential backoff in milliseconds. A delay is never cut
    /// below `attempt * retry_delay`.
    pub max_backoff_ms: u64,
    /// How many finished task records are kept for lookup.
    pub retain_finished: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            queue_size: 1000,
            task_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            max_priority: 10,
            metrics_window_ms: 10_000,
            dispatch_interval_ms: 1_000,
            pool_queue_size: None,
            backoff: BackoffKind::Linear,
            max_backoff_ms: 300_000,
            retain_finished: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".into());
        }
        if self.queue_size == 0 {
            return Err("queue_size must be greater than 0".into());
        }
        if self.task_timeout_ms == 0 {
            return Err("task_timeout_ms must be greater than 0".into());
        }
        if self.retry_delay_ms == 0 {
            return Err("retry_delay_ms must be greater than 0".into());
        }
        if self.metrics_window_ms == 0 {
            return Err("metrics_window_ms must be greater than 0".into());
        }
        if self.dispatch_interval_ms == 0 {
            return Err("dispatch_interval_ms must be greater than 0".into());
        }
        if self.pool_queue_size == Some(0) {
            return Err("pool_queue_size must be greater than 0".into());
        }
        if self.max_backoff_ms < self.retry_delay_ms {
            return Err("max_backoff_ms must not be smaller than retry_delay_ms".into());
        }
        if self.max_priority > MAX_PRIORITY_LIMIT {
            return Err(format!("max_priority must not exceed {MAX_PRIORITY_LIMIT}"));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `LANES_*` environment variables, loading a
    /// `.env` file first if one exists. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or the
    /// validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        read_env("WORKERS", &mut cfg.workers)?;
        read_env("QUEUE_SIZE", &mut cfg.queue_size)?;
        read_env("TASK_TIMEOUT_MS", &mut cfg.task_timeout_ms)?;
        read_env("MAX_RETRIES", &mut cfg.max_retries)?;
        read_env("RETRY_DELAY_MS", &mut cfg.retry_delay_ms)?;
        read_env("MAX_PRIORITY", &mut cfg.max_priority)?;
        read_env("METRICS_WINDOW_MS", &mut cfg.metrics_window_ms)?;
        read_env("DISPATCH_INTERVAL_MS", &mut cfg.dispatch_interval_ms)?;
        read_env("BACKOFF", &mut cfg.backoff)?;
        read_env("MAX_BACKOFF_MS", &mut cfg.max_backoff_ms)?;
        read_env("RETAIN_FINISHED", &mut cfg.retain_finished)?;
        let mut pool_queue_size = 0usize;
        if read_env("POOL_QUEUE_SIZE", &mut pool_queue_size)? {
            cfg.pool_queue_size = Some(pool_queue_size);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Default base retry delay.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Exponential backoff ceiling.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Metrics sampling interval.
    #[must_use]
    pub const fn metrics_window(&self) -> Duration {
        Duration::from_millis(self.metrics_window_ms)
    }

    /// Dispatcher tick.
    #[must_use]
    pub const fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    /// Worker pool configuration derived from this configuration.
    #[must_use]
    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_count(self.workers)
            .with_queue_capacity(self.pool_queue_size.unwrap_or(self.workers))
            .with_task_timeout(self.task_timeout())
    }
}

fn read_env<T>(name: &str, slot: &mut T) -> Result<bool, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    match std::env::var(&key) {
        Ok(raw) => {
            *slot = raw
                .trim()
                .parse()
                .map_err(|e| format!("{key}: {e}"))?;
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}
