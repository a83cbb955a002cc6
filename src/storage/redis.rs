// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::RedisConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::rate::{Rate, Transition};
use crate::resilience::ExponentialBackoff;
use crate::storage::{Mutation, StorageBackend};

// Writes ARGV[3] only if the key still holds ARGV[2] (or is still missing
// when ARGV[1] is "1"). Returns 1 on success, 0 when another writer got there
// first.
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current then
        return 0
    end
elseif current ~= ARGV[2] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
"#;

/// Redis backend.
///
/// Rates are stored as JSON documents. Updates are optimistic: read the raw
/// value, run the mutation, then compare-and-set through a Lua script. A
/// conflicting write makes the update start over after a backoff; running out
/// of attempts is reported as [`RateLimiterError::RaceLoss`].
pub struct RedisStorage {
    connection: ConnectionManager,
    compare_and_set: Arc<Script>,
    clock: Arc<dyn Clock>,
    config: RedisConfig,
}

// Manually implement Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("key_ttl_grace", &self.config.key_ttl_grace)
            .finish()
    }
}

// Manually implement Clone
impl Clone for RedisStorage {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            compare_and_set: Arc::clone(&self.compare_and_set),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl RedisStorage {
    /// Creates a new Redis storage with the given configuration
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| RateLimiterError::Storage(StorageError::RedisConnection(e.to_string())))?;

        let connection_future = ConnectionManager::new(client);

        // Apply the connection timeout using tokio::time::timeout
        let connection = match tokio::time::timeout(config.connection_timeout, connection_future)
            .await
        {
            Ok(result) => result.map_err(|e| {
                RateLimiterError::Storage(StorageError::RedisConnection(e.to_string()))
            })?,
            Err(_) => {
                return Err(RateLimiterError::BackendUnavailable(format!(
                    "Connection to Redis at {} timed out after {:?}",
                    config.url, config.connection_timeout
                )));
            }
        };

        Ok(Self {
            connection,
            compare_and_set: Arc::new(Script::new(COMPARE_AND_SET)),
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Replaces the clock used to compute key expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let ping_future = redis::AsyncCommands::ping::<String>(&mut conn);

        let result = match tokio::time::timeout(self.config.connection_timeout, ping_future).await {
            Ok(inner_result) => inner_result?,
            Err(_) => {
                return Err(RateLimiterError::BackendUnavailable(format!(
                    "Redis PING operation timed out after {:?}",
                    self.config.connection_timeout
                )));
            }
        };

        if result == "PONG" {
            Ok(())
        } else {
            Err(RateLimiterError::Storage(StorageError::RedisCommand(
                format!("Unexpected response from Redis PING: {}", result),
            )))
        }
    }

    /// Removes a key; used to isolate tests and benchmark runs
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    /// Writes raw bytes under a key, bypassing the codec
    pub async fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    // Keys outlive their window by the configured grace, then Redis drops them
    fn ttl_millis(&self, rate: &Rate) -> u64 {
        let now = self.clock.now_millis();
        rate.reset_after_millis(now).max(1) + self.config.key_ttl_grace.as_millis() as u64
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn try_swap(&self, key: &str, expected: Option<&[u8]>, new: &[u8], ttl: u64) -> Result<bool> {
        let mut conn = self.connection.clone();
        let swapped: i64 = self
            .compare_and_set
            .key(key)
            .arg(if expected.is_none() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(new)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    type Config = RedisConfig;

    async fn new(config: Self::Config) -> Result<Self> {
        Self::new(config).await
    }

    async fn load(&self, key: &str) -> Result<Option<Rate>> {
        match self.get_raw(key).await? {
            Some(bytes) => Ok(Some(Rate::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, rate: &Rate) -> Result<()> {
        let value = rate.encode()?;
        let ttl = self.ttl_millis(rate);
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(&rate.key)
            .arg(value)
            .arg("PX")
            .arg(ttl)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn update(&self, key: &str, mutate: Mutation<'_>) -> Result<Transition> {
        let mut backoff = ExponentialBackoff::new(self.config.cas_retry.clone());
        let mut attempts = 0;

        loop {
            attempts += 1;

            let raw = self.get_raw(key).await?;
            let current = match raw.as_deref() {
                Some(bytes) => Some(Rate::decode(key, bytes)?),
                None => None,
            };

            let transition = mutate(current);
            let encoded = transition.rate.encode()?;
            let ttl = self.ttl_millis(&transition.rate);

            if self.try_swap(key, raw.as_deref(), &encoded, ttl).await? {
                trace!(key = key, attempts = attempts, "Compare-and-set succeeded");
                return Ok(transition);
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    debug!(key = key, attempt = attempts, ?delay, "Compare-and-set conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(RateLimiterError::RaceLoss {
                        key: key.to_string(),
                        attempts,
                    });
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
