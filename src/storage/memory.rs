// src/storage/memory.rs

// In-process storage (for single instance gateways and tests)
// One mutex guards the whole map; every update runs load, mutate and save
// under it. Nothing is shared across processes.
//
// Expired rates stay readable so the engine rolls them over, but once the map
// is full they are dropped to make room for new keys.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::config::InMemoryConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::rate::{Rate, Transition};
use crate::storage::{Mutation, StorageBackend};

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Rate>>>,
    clock: Arc<dyn Clock>,
    config: InMemoryConfig,
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Same as [`MemoryStorage::new`], judging expiry by `clock`
    pub fn with_clock(config: InMemoryConfig, clock: Arc<dyn Clock>) -> Self {
        let data = Arc::new(Mutex::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        Self {
            data,
            clock,
            config,
        }
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.lock().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every rate whose window has ended; returns how many went
    pub fn purge_expired(&self) -> Result<usize> {
        let mut data = self.lock()?;
        Ok(self.evict_expired(&mut data))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Rate>>> {
        self.data
            .lock()
            .map_err(|_| RateLimiterError::Internal("memory storage lock poisoned".to_string()))
    }

    fn evict_expired(&self, data: &mut HashMap<String, Rate>) -> usize {
        let now = self.clock.now_millis();
        let before = data.len();
        data.retain(|_, rate| !rate.is_expired(now));
        let evicted = before - data.len();
        trace!(evicted, "Memory storage sweep");
        evicted
    }

    // A new key at capacity first reclaims the slots of ended windows
    fn make_room(&self, data: &mut HashMap<String, Rate>, key: &str) -> Result<()> {
        if data.len() < self.config.max_entries || data.contains_key(key) {
            return Ok(());
        }
        self.evict_expired(data);
        if data.len() >= self.config.max_entries {
            return Err(RateLimiterError::Storage(StorageError::CapacityExceeded(
                format!("Maximum entries limit of {} reached", self.config.max_entries),
            )));
        }
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    type Config = InMemoryConfig;

    async fn new(config: Self::Config) -> Result<Self> {
        Ok(Self::new(config))
    }

    async fn load(&self, key: &str) -> Result<Option<Rate>> {
        let data = self.lock()?;
        Ok(data.get(key).cloned())
    }

    async fn save(&self, rate: &Rate) -> Result<()> {
        let mut data = self.lock()?;
        self.make_room(&mut data, &rate.key)?;
        data.insert(rate.key.clone(), rate.clone());
        Ok(())
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Transition> {
        let mut data = self.lock()?;
        self.make_room(&mut data, key)?;

        let transition = mutate(data.get(key).cloned());
        data.insert(key.to_string(), transition.rate.clone());
        Ok(transition)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
