// src/resilience/mod.rs
//! Resilience around storage backends.
//!
//! - **Circuit breaking**: stop calling a backend that keeps failing, so
//!   requests degrade at once instead of each waiting for a timeout
//! - **Retry with exponential backoff**: spacing for compare-and-swap retries

mod circuit_breaker;
mod exponential_backoff;
mod guarded_storage;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use guarded_storage::GuardedStorage;
