// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{RateLimiterError, Result};
use crate::policy::Discriminator;
use crate::resilience::RetryConfig;

/// What the engine does when authoritative state is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Admit the request without touching the quota
    #[default]
    Open,
    /// Reject the request
    Closed,
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Upper bound for a single backend call
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Behaviour on backend failure
    #[serde(default)]
    pub fail_mode: FailMode,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            fail_mode: FailMode::default(),
        }
    }
}

fn default_key_prefix() -> String {
    "rate-limit-application".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// One policy entry as written in configuration.
///
/// `limit` counts requests per window, `quota` bounds the summed upstream
/// response time per window. At least one of them must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub limit: Option<u64>,

    #[serde(default, with = "option_duration_serde")]
    pub quota: Option<Duration>,

    #[serde(default = "default_refresh_interval", with = "duration_serde")]
    pub refresh_interval: Duration,

    /// Request attributes that split the counter
    #[serde(default, rename = "type")]
    pub discriminators: Vec<Discriminator>,
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(60)
}

/// Full rate limiting configuration of a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitProperties {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Leading segment of every storage key built from these policies
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(flatten)]
    pub limiter: RateLimiterConfig,

    /// Applied to routes without a policy list of their own
    #[serde(default)]
    pub default_policies: Vec<PolicyConfig>,

    /// Route id to ordered policy list
    #[serde(default)]
    pub policies: HashMap<String, Vec<PolicyConfig>>,
}

fn default_enabled() -> bool {
    true
}

impl Default for RateLimitProperties {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            key_prefix: default_key_prefix(),
            limiter: RateLimiterConfig::default(),
            default_policies: Vec::new(),
            policies: HashMap::new(),
        }
    }
}

impl RateLimitProperties {
    /// Parse properties from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RateLimiterError::Config(e.to_string()))
    }

    /// Load properties from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Extra lifetime given to a key past its window end
    #[serde(default = "default_key_ttl_grace", with = "duration_serde")]
    pub key_ttl_grace: Duration,

    /// Backoff between compare-and-swap attempts
    #[serde(default)]
    pub cas_retry: RetryConfig,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_key_ttl_grace() -> Duration {
    Duration::from_secs(60)
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_conn_timeout(),
            key_ttl_grace: default_key_ttl_grace(),
            cas_retry: RetryConfig::default(),
        }
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of keys to track
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// Configuration for the expiring cache backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live keys
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

/// Configuration for the SQLite backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, or ":memory:"
    pub path: String,

    /// How long a writer waits for the database lock. SQLite calls block
    /// their task, so this is the real bound on a contended call.
    #[serde(default = "default_busy_timeout", with = "duration_serde")]
    pub busy_timeout: Duration,
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(1)
}

impl SqliteConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: default_busy_timeout(),
        }
    }

    /// Caps `busy_timeout` at `timeout`, usually the engine timeout
    pub fn fit_within(mut self, timeout: Duration) -> Self {
        self.busy_timeout = self.busy_timeout.min(timeout);
        self
    }
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
