// src/storage/mod.rs

pub mod cache;
pub mod memory;
pub mod redis;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use cache::CacheStorage;
pub use memory::MemoryStorage;
pub use redis::RedisStorage;
pub use sqlite::SqliteStorage;

use super::error::Result;
use crate::rate::{Rate, Transition};
use async_trait::async_trait;
use std::fmt::Debug;

/// Pure state transition run by [`StorageBackend::update`]. It may be called
/// more than once per update when a backend retries an optimistic write.
pub type Mutation<'a> = &'a (dyn Fn(Option<Rate>) -> Transition + Send + Sync);

/// Core trait that all storage backends must implement
///
/// `update` is the unit of mutual exclusion: two concurrent updates of the
/// same key must never both observe the same stored rate. Every backend
/// provides this with its own primitive (lock, compare-and-swap, write
/// transaction). A plain `load` followed by `save` offers no such guarantee
/// and is only meant for inspection and seeding.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // The type of configuration this storage backend accepts
    type Config: Send + Sync;

    // Creates a new instance of this storage backend with the given configuration
    async fn new(config: Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Current state of `key`; `Ok(None)` if it was never written
    async fn load(&self, key: &str) -> Result<Option<Rate>>;

    /// Stores `rate` under `rate.key`, replacing any previous value
    async fn save(&self, rate: &Rate) -> Result<()>;

    /// Atomically reads `key`, applies `mutate` and persists its result
    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Transition>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
