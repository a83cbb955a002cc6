// src/storage/cache.rs

//! Expiring cache backend.
//!
//! Entries live until the end of their window. An expired entry reads as
//! absent, so the store's own expiry takes over from the engine's rollover
//! check. Updates hold the map shard lock of their key, which serialises
//! concurrent updates of one key without blocking unrelated keys.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::task;
use tokio::time;
use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::rate::{Rate, Transition};
use crate::storage::{Mutation, StorageBackend};

/// Cache backend keyed by rate key, expiring at each rate's reset time
#[derive(Debug, Clone)]
pub struct CacheStorage {
    entries: Arc<DashMap<String, Rate>>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl CacheStorage {
    /// Creates a cache using the wall clock.
    ///
    /// With `use_background_task` set this must be called inside a tokio
    /// runtime. The sweeper stops once the last clone of the cache is dropped.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let entries = Arc::new(DashMap::with_capacity(config.max_entries.min(10_000)));

        if config.use_background_task {
            let weak = Arc::downgrade(&entries);
            let sweep_clock = Arc::clone(&clock);
            let interval = config.cleanup_interval;

            task::spawn(async move {
                let mut interval = time::interval(interval);
                loop {
                    interval.tick().await;
                    if !Self::sweep(&weak, sweep_clock.as_ref()) {
                        break;
                    }
                }
            });
        }

        Self {
            entries,
            clock,
            config,
        }
    }

    /// Drops expired entries; false once the cache itself is gone
    fn sweep(entries: &Weak<DashMap<String, Rate>>, clock: &dyn Clock) -> bool {
        let Some(entries) = entries.upgrade() else {
            return false;
        };
        let now = clock.now_millis();
        let before = entries.len();
        entries.retain(|_, rate| !rate.is_expired(now));
        trace!(evicted = before.saturating_sub(entries.len()), "Cache sweep");
        true
    }

    /// Runs one sweep right away
    pub fn purge_expired(&self) {
        Self::sweep(&Arc::downgrade(&self.entries), self.clock.as_ref());
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_capacity(&self) -> Result<()> {
        if self.entries.len() >= self.config.max_entries {
            return Err(RateLimiterError::Storage(StorageError::CapacityExceeded(
                format!("Maximum entries limit of {} reached", self.config.max_entries),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for CacheStorage {
    type Config = CacheConfig;

    async fn new(config: Self::Config) -> Result<Self> {
        Ok(Self::new(config))
    }

    async fn load(&self, key: &str) -> Result<Option<Rate>> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .get(key)
            .filter(|rate| !rate.is_expired(now))
            .map(|rate| rate.value().clone()))
    }

    async fn save(&self, rate: &Rate) -> Result<()> {
        if !self.entries.contains_key(&rate.key) {
            self.check_capacity()?;
        }
        self.entries.insert(rate.key.clone(), rate.clone());
        Ok(())
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Transition> {
        let now = self.clock.now_millis();
        if !self.entries.contains_key(key) {
            self.check_capacity()?;
        }

        // The entry guard holds the shard lock until the new rate is in place
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get().clone()).filter(|rate| !rate.is_expired(now));
                let transition = mutate(current);
                occupied.insert(transition.rate.clone());
                Ok(transition)
            }
            Entry::Vacant(vacant) => {
                let transition = mutate(None);
                vacant.insert(transition.rate.clone());
                Ok(transition)
            }
        }
    }

    fn name(&self) -> &'static str {
        "cache"
    }
}
