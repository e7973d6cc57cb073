//! Tests for utility functions

use std::time::Duration;

use prometheus_lanes::config::BackoffKind;
use prometheus_lanes::core::RetryPolicy;
use prometheus_lanes::util::{now_ms, panic_message, Clock, ManualClock, SystemClock};

#[test]
fn test_manual_clock_is_shared() {
    let clock = ManualClock::new(5_000);
    let handle = clock.clone();
    clock.advance(Duration::from_millis(250));
    assert_eq!(handle.now_ms(), 5_250);
    handle.set(10);
    assert_eq!(clock.now_ms(), 10);
}

#[test]
fn test_system_clock_tracks_wall_time() {
    let before = now_ms();
    let observed = SystemClock.now_ms();
    assert!(observed >= before);
}

#[test]
fn test_panic_message() {
    let from_str = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
    assert_eq!(panic_message(from_str.as_ref()), "static message");

    let code = 7;
    let from_string = std::panic::catch_unwind(|| panic!("code {code}")).unwrap_err();
    assert_eq!(panic_message(from_string.as_ref()), "code 7");
}

#[test]
fn test_retry_policy_backoff() {
    let base = Duration::from_millis(100);
    let linear = RetryPolicy::new(BackoffKind::Linear, Duration::from_secs(1));
    let exponential = RetryPolicy::new(BackoffKind::Exponential, Duration::from_secs(1));

    assert_eq!(linear.delay(4, base), Duration::from_millis(400));
    assert_eq!(exponential.delay(4, base), Duration::from_millis(800));
    assert_eq!(exponential.delay(8, base), Duration::from_secs(1));

    // The ceiling only bounds growth above the linear floor
    assert_eq!(linear.delay(50, base), Duration::from_secs(5));
    assert_eq!(exponential.delay(20, base), Duration::from_secs(2));
}
