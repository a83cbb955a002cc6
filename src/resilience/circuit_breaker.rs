use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::duration_serde;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls reach the backend
    Closed,
    /// Calls fail fast until `reset_timeout` has elapsed
    Open,
    /// Trial calls decide whether to close again
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// Time spent open before trial calls are let through
    #[serde(with = "duration_serde")]
    pub reset_timeout: Duration,
    /// Consecutive trial successes that close the circuit
    pub success_threshold: usize,
    /// Longest a guarded call may run before it counts as a failure. Keep it
    /// below the engine timeout, which would otherwise cancel the call first.
    #[serde(with = "duration_serde")]
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            call_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    failures: usize,
    successes: usize,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.successes = 0;
    }
}

/// Tracks backend failures and short-circuits calls to a backend that keeps
/// failing
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<Breaker>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: RwLock::new(Breaker {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
            config,
        }
    }

    /// Whether a call may go through now. An open circuit whose timeout has
    /// elapsed moves to half-open and lets the call through as a trial.
    pub async fn allow_request(&self) -> bool {
        {
            let breaker = self.inner.read().await;
            match breaker.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    let waiting = breaker
                        .opened_at
                        .is_some_and(|at| at.elapsed() < self.config.reset_timeout);
                    if waiting {
                        return false;
                    }
                }
            }
        }

        let mut breaker = self.inner.write().await;
        // Another caller may have moved the state on meanwhile
        if breaker.state == CircuitState::Open {
            breaker.state = CircuitState::HalfOpen;
            breaker.successes = 0;
            debug!("Circuit breaker half-open, letting trial calls through");
        }
        breaker.state != CircuitState::Open
    }

    pub async fn record_success(&self) {
        let mut breaker = self.inner.write().await;
        match breaker.state {
            CircuitState::Closed => breaker.failures = 0,
            CircuitState::HalfOpen => {
                breaker.successes += 1;
                if breaker.successes >= self.config.success_threshold {
                    breaker.state = CircuitState::Closed;
                    breaker.failures = 0;
                    breaker.successes = 0;
                    breaker.opened_at = None;
                    debug!("Circuit breaker closed after successful trial calls");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut breaker = self.inner.write().await;
        match breaker.state {
            CircuitState::Closed => {
                breaker.failures += 1;
                if breaker.failures >= self.config.failure_threshold {
                    breaker.open();
                    warn!(
                        failures = breaker.failures,
                        "Circuit breaker opened after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                breaker.open();
                warn!("Circuit breaker re-opened after a failed trial call");
            }
            CircuitState::Open => {}
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }
}
