//! Tests for configuration validation

use std::time::Duration;

use prometheus_lanes::config::{BackoffKind, SchedulerConfig, WorkerPoolConfig, MAX_PRIORITY_LIMIT};

#[test]
fn test_scheduler_config_defaults() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.workers >= 1);
    assert_eq!(cfg.queue_size, 1000);
    assert_eq!(cfg.max_retries, 3);
    assert_eq!(cfg.max_priority, 10);
    assert_eq!(cfg.backoff, BackoffKind::Linear);
    assert_eq!(cfg.task_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.retry_delay(), Duration::from_secs(1));
}

#[test]
fn test_scheduler_config_rejects_zero_values() {
    let zeroed = [
        SchedulerConfig { workers: 0, ..SchedulerConfig::default() },
        SchedulerConfig { queue_size: 0, ..SchedulerConfig::default() },
        SchedulerConfig { task_timeout_ms: 0, ..SchedulerConfig::default() },
        SchedulerConfig { retry_delay_ms: 0, ..SchedulerConfig::default() },
        SchedulerConfig { metrics_window_ms: 0, ..SchedulerConfig::default() },
        SchedulerConfig { pool_queue_size: Some(0), ..SchedulerConfig::default() },
    ];
    for cfg in zeroed {
        assert!(cfg.validate().is_err(), "{cfg:?} should be invalid");
    }
}

#[test]
fn test_scheduler_config_bounds_max_priority() {
    let cfg = SchedulerConfig { max_priority: MAX_PRIORITY_LIMIT, ..SchedulerConfig::default() };
    assert!(cfg.validate().is_ok());

    let cfg = SchedulerConfig { max_priority: MAX_PRIORITY_LIMIT + 1, ..SchedulerConfig::default() };
    assert!(cfg.validate().unwrap_err().contains("max_priority"));
    assert!(SchedulerConfig::from_json_str(r#"{ "max_priority": 2147483647 }"#).is_err());
}

#[test]
fn test_backoff_ceiling_equal_to_retry_delay_is_valid() {
    let cfg = SchedulerConfig { retry_delay_ms: 100, max_backoff_ms: 100, ..SchedulerConfig::default() };
    assert!(cfg.validate().is_ok());

    let cfg = SchedulerConfig { retry_delay_ms: 100, max_backoff_ms: 99, ..SchedulerConfig::default() };
    assert!(cfg.validate().is_err());
}

// Every `LANES_*` variable is touched by this one test only, so parallel
// tests never observe a half-set environment.
#[test]
fn test_scheduler_config_from_env() {
    const VARS: [&str; 6] = [
        "LANES_WORKERS",
        "LANES_QUEUE_SIZE",
        "LANES_BACKOFF",
        "LANES_POOL_QUEUE_SIZE",
        "LANES_MAX_BACKOFF_MS",
        "LANES_MAX_PRIORITY",
    ];
    let clear = || VARS.iter().for_each(|var| std::env::remove_var(var));

    clear();
    std::env::set_var("LANES_WORKERS", "3");
    std::env::set_var("LANES_QUEUE_SIZE", " 64 ");
    std::env::set_var("LANES_BACKOFF", "Exponential");
    std::env::set_var("LANES_POOL_QUEUE_SIZE", "6");
    let cfg = SchedulerConfig::from_env();

    std::env::set_var("LANES_QUEUE_SIZE", "abc");
    let bad_number = SchedulerConfig::from_env();

    std::env::set_var("LANES_QUEUE_SIZE", "64");
    std::env::set_var("LANES_MAX_PRIORITY", "1000");
    let out_of_range = SchedulerConfig::from_env();
    clear();

    let cfg = cfg.unwrap();
    assert_eq!(cfg.workers, 3);
    assert_eq!(cfg.queue_size, 64);
    assert_eq!(cfg.backoff, BackoffKind::Exponential);
    assert_eq!(cfg.pool_queue_size, Some(6));
    assert_eq!(cfg.max_retries, 3);
    assert_eq!(cfg.worker_pool().queue_capacity, 6);

    let err = bad_number.unwrap_err();
    assert!(err.starts_with("LANES_QUEUE_SIZE:"), "{err}");
    assert!(out_of_range.unwrap_err().contains("max_priority"));
}

#[test]
fn test_scheduler_config_from_json() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{ "workers": 4, "queue_size": 50, "backoff": "exponential", "pool_queue_size": 8 }"#,
    )
    .unwrap();
    assert_eq!(cfg.workers, 4);
    assert_eq!(cfg.queue_size, 50);
    assert_eq!(cfg.backoff, BackoffKind::Exponential);
    assert_eq!(cfg.retry_delay_ms, 1_000);

    let pool = cfg.worker_pool();
    assert_eq!(pool.worker_count, 4);
    assert_eq!(pool.queue_capacity, 8);

    assert!(SchedulerConfig::from_json_str(r#"{ "workers": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_worker_pool_config_validation() {
    assert!(WorkerPoolConfig::new().validate().is_ok());
    assert!(WorkerPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_queue_capacity(0).validate().is_err());
    assert!(WorkerPoolConfig::new()
        .with_task_timeout(Duration::ZERO)
        .validate()
        .is_err());
}
