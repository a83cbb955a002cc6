// src/test_utils.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ManualClock;
use crate::config::{FailMode, InMemoryConfig, RateLimiterConfig};
use crate::error::{RateLimiterError, Result, StorageError};
use crate::policy::PolicyResolver;
use crate::rate::{Rate, Transition};
use crate::storage::{MemoryStorage, Mutation, StorageBackend};
use crate::RateLimiter;

/// What [`FlakyStorage`] does on its next calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Forward to the in-memory store
    None,
    /// Fail as if the connection dropped
    Unavailable,
    /// Hand back bytes that do not decode
    Corrupt,
    /// Never answer
    Hang,
}

/// Memory-backed storage whose failures can be scripted
#[derive(Debug, Clone)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fault: Arc<std::sync::Mutex<Fault>>,
    // Remaining calls to fail before healing; usize::MAX means forever
    failures_left: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::default(),
            fault: Arc::new(std::sync::Mutex::new(Fault::None)),
            failures_left: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails every call with `fault` until [`FlakyStorage::heal`]
    pub fn fail_with(&self, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
        self.failures_left.store(usize::MAX, Ordering::SeqCst);
    }

    /// Fails the next `count` calls with `fault`
    pub fn fail_next(&self, count: usize, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    /// Calls that reached this backend, failing or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn inject(&self, key: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        if left != usize::MAX {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
        }

        let fault = *self.fault.lock().unwrap();
        match fault {
            Fault::None => Ok(()),
            Fault::Unavailable => Err(RateLimiterError::Storage(StorageError::RedisConnection(
                "Simulated connection failure".to_string(),
            ))),
            Fault::Corrupt => Err(Rate::decode(key, b"{not json").unwrap_err()),
            Fault::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl StorageBackend for FlakyStorage {
    type Config = ();

    async fn new(_config: Self::Config) -> Result<Self> {
        Ok(Self::new())
    }

    async fn load(&self, key: &str) -> Result<Option<Rate>> {
        self.inject(key).await?;
        self.inner.load(key).await
    }

    async fn save(&self, rate: &Rate) -> Result<()> {
        self.inject(&rate.key).await?;
        self.inner.save(rate).await
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Transition> {
        self.inject(key).await?;
        self.inner.update(key, mutate).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Engine over fresh memory storage, driven by a manual clock starting at 0
pub fn create_test_rate_limiter(
    resolver: PolicyResolver,
    fail_mode: FailMode,
) -> (RateLimiter<MemoryStorage>, ManualClock) {
    let clock = ManualClock::new(0);
    let storage = Arc::new(MemoryStorage::with_clock(
        InMemoryConfig::default(),
        Arc::new(clock.clone()),
    ));
    let config = RateLimiterConfig {
        timeout: Duration::from_secs(1),
        fail_mode,
    };
    let limiter = RateLimiter::new(storage, resolver, config).with_clock(Arc::new(clock.clone()));
    (limiter, clock)
}

/// Engine over a [`FlakyStorage`] with a short timeout
pub fn create_flaky_rate_limiter(
    resolver: PolicyResolver,
    fail_mode: FailMode,
) -> (RateLimiter<FlakyStorage>, FlakyStorage, ManualClock) {
    let clock = ManualClock::new(0);
    let storage = FlakyStorage::new();
    let config = RateLimiterConfig {
        timeout: Duration::from_millis(50),
        fail_mode,
    };
    let limiter = RateLimiter::new(Arc::new(storage.clone()), resolver, config)
        .with_clock(Arc::new(clock.clone()));
    (limiter, storage, clock)
}
