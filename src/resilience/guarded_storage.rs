use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::{RateLimiterError, Result};
use crate::rate::{Rate, Transition};
use crate::storage::{Mutation, StorageBackend};

/// Puts a circuit breaker in front of any backend.
///
/// Only failures that say the backend is unreachable count towards opening
/// the circuit; a corrupted record or a lost race says nothing about the
/// backend's health. While the circuit is open every call fails with
/// [`RateLimiterError::BackendUnavailable`] without touching the backend, so
/// the engine degrades immediately instead of waiting out its timeout.
///
/// Calls are cut off after `call_timeout`, and a call cut off that way counts
/// as a failure, so a backend that stops answering opens the circuit too.
#[derive(Debug, Clone)]
pub struct GuardedStorage<S: StorageBackend> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S: StorageBackend> GuardedStorage<S> {
    pub fn wrap(inner: S, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            breaker: Arc::new(CircuitBreaker::new(config)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    async fn guarded<T, F>(&self, operation: &str, key: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        if !self.breaker.allow_request().await {
            debug!(backend = self.inner.name(), operation, "Circuit open, failing fast");
            return Err(RateLimiterError::BackendUnavailable(format!(
                "circuit open for {} backend",
                self.inner.name()
            )));
        }

        let timeout = self.breaker.config().call_timeout;
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RateLimiterError::timed_out(operation, key, timeout)),
        };
        match &result {
            Err(e) if e.is_unavailable() => self.breaker.record_failure().await,
            _ => self.breaker.record_success().await,
        }
        result
    }
}

#[async_trait]
impl<S> StorageBackend for GuardedStorage<S>
where
    S: StorageBackend,
    S::Config: 'static,
{
    type Config = (S::Config, CircuitBreakerConfig);

    async fn new(config: Self::Config) -> Result<Self> {
        let (backend_config, breaker_config) = config;
        let inner = S::new(backend_config).await?;
        Ok(Self::wrap(inner, breaker_config))
    }

    async fn load(&self, key: &str) -> Result<Option<Rate>> {
        self.guarded("load", key, self.inner.load(key)).await
    }

    async fn save(&self, rate: &Rate) -> Result<()> {
        self.guarded("save", &rate.key, self.inner.save(rate)).await
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Transition> {
        self.guarded("update", key, self.inner.update(key, mutate)).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
