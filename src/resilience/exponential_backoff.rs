use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_serde;

/// Retry schedule for conflicting writes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_attempts: usize,
    #[serde(with = "duration_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_serde")]
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0)
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        // Conflicts clear within a round trip, so start small
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

/// Produces the delays of one retry sequence
#[derive(Debug)]
pub struct ExponentialBackoff {
    retries: usize,
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { retries: 0, config }
    }

    /// Delay before the next retry, or `None` once the retries are spent
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_attempts {
            return None;
        }
        let exponent = self.retries as i32;
        self.retries += 1;

        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let delay_ms = (base_ms * self.config.backoff_multiplier.powi(exponent)).min(max_ms);

        let delay_ms = if self.config.use_jitter {
            delay_ms * rand::rng().random_range(0.5..1.0)
        } else {
            delay_ms
        };

        Some(Duration::from_millis(delay_ms as u64))
    }

    /// Retries handed out so far
    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }
}
