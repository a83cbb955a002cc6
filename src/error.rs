// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// The store could not be reached, or did not answer in time
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Persisted bytes could not be turned back into a rate
    #[error("Failed to decode rate for key '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// Malformed policy configuration, fatal at load time
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// A concurrent writer kept winning the compare-and-swap
    #[error("Lost update race on key '{key}' after {attempts} attempts")]
    RaceLoss { key: String, attempts: usize },

    /// Errors related to the storage backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RateLimiterError {
    pub(crate) fn timed_out(operation: &str, key: &str, timeout: Duration) -> Self {
        RateLimiterError::BackendUnavailable(format!(
            "{} on key '{}' timed out after {:?}",
            operation, key, timeout
        ))
    }

    pub(crate) fn decode(key: &str, reason: impl ToString) -> Self {
        RateLimiterError::Decode {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure means the backend itself is unhealthy, as opposed
    /// to a bad record or a lost race.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RateLimiterError::BackendUnavailable(_)
                | RateLimiterError::Storage(StorageError::RedisConnection(_))
                | RateLimiterError::Storage(StorageError::RedisCommand(_))
                | RateLimiterError::Storage(StorageError::Sqlite(_))
        )
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// SQLite statement or connection errors
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// Data serialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// The backend refuses to track more keys
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
}

impl From<StorageError> for RateLimiterError {
    fn from(err: StorageError) -> Self {
        RateLimiterError::Storage(err)
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                RateLimiterError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                RateLimiterError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            _ => RateLimiterError::Storage(StorageError::RedisCommand(err.to_string())),
        }
    }
}

impl From<rusqlite::Error> for RateLimiterError {
    fn from(err: rusqlite::Error) -> Self {
        RateLimiterError::Storage(StorageError::Sqlite(err.to_string()))
    }
}

// encoding failures only; decoding goes through RateLimiterError::Decode
impl From<serde_json::Error> for RateLimiterError {
    fn from(err: serde_json::Error) -> Self {
        RateLimiterError::Storage(StorageError::Serialization(err.to_string()))
    }
}

impl From<std::io::Error> for RateLimiterError {
    fn from(err: std::io::Error) -> Self {
        RateLimiterError::Config(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
