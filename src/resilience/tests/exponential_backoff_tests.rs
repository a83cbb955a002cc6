// src/resilience/tests/exponential_backoff_tests.rs

use std::time::Duration;

use crate::resilience::{ExponentialBackoff, RetryConfig};

fn deterministic(max_attempts: usize, max_backoff: Duration) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff,
        backoff_multiplier: 2.0,
        use_jitter: false,
    }
}

#[test]
fn test_backoff_doubles_until_attempts_run_out() {
    let mut backoff = ExponentialBackoff::new(deterministic(4, Duration::from_secs(1)));

    let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(40),
            Duration::from_millis(80),
        ]
    );
    assert_eq!(backoff.retries(), 4);
}

#[test]
fn test_backoff_respects_max_backoff() {
    let mut backoff = ExponentialBackoff::new(deterministic(6, Duration::from_millis(30)));

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(20)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(30)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(30)));
}

#[test]
fn test_zero_attempts_never_retries() {
    let mut backoff = ExponentialBackoff::new(deterministic(0, Duration::from_secs(1)));
    assert_eq!(backoff.next_backoff(), None);
}

#[test]
fn test_jitter_stays_within_half_to_full() {
    let config = RetryConfig {
        use_jitter: true,
        ..deterministic(50, Duration::from_millis(100))
    };
    let mut backoff = ExponentialBackoff::new(config);

    // Past the fourth retry every delay is the 100ms cap before jitter
    for _ in 0..4 {
        backoff.next_backoff();
    }
    while let Some(delay) = backoff.next_backoff() {
        assert!(delay >= Duration::from_millis(50), "{:?} below half", delay);
        assert!(delay <= Duration::from_millis(100), "{:?} above cap", delay);
    }
}

#[test]
fn test_reset_starts_over() {
    let mut backoff = ExponentialBackoff::new(deterministic(2, Duration::from_secs(1)));
    backoff.next_backoff();
    backoff.next_backoff();
    assert_eq!(backoff.next_backoff(), None);

    backoff.reset();
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));
}

#[test]
fn test_retry_config_from_json_uses_defaults() {
    let config: RetryConfig = serde_json::from_str(r#"{ "max_attempts": 3 }"#).unwrap();
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.initial_backoff, RetryConfig::default().initial_backoff);
    assert!(config.use_jitter);
}
