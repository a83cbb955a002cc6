// src/rate.rs

//! The persisted counter record for one key within one window.

use serde::{Deserialize, Serialize};

use crate::error::{RateLimiterError, Result};
use crate::policy::Policy;

/// Quota state of a single key.
///
/// `reset` is the absolute end of the current window in epoch milliseconds.
/// `limit` is persisted so that a policy change can be detected on the next
/// access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub key: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

impl Rate {
    /// State of a key that has never been seen: full quota, window starting now
    pub fn fresh(key: &str, policy: &Policy, now: u64) -> Self {
        Self {
            key: key.to_string(),
            limit: policy.limit(),
            remaining: policy.limit(),
            reset: window_end(policy, now),
        }
    }

    /// Whether the window this rate belongs to has ended
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.reset
    }

    /// Starts a new window: full quota again, reset pushed to now + interval
    pub fn roll_over(&mut self, policy: &Policy, now: u64) {
        self.limit = policy.limit();
        self.remaining = policy.limit();
        self.reset = window_end(policy, now);
    }

    /// Re-bases a rate written under a different limit. Remaining quota is
    /// clamped, never raised.
    pub fn rebase(&mut self, policy: &Policy) -> bool {
        if self.limit == policy.limit() {
            return false;
        }
        self.limit = policy.limit();
        self.remaining = self.remaining.min(self.limit);
        true
    }

    /// Milliseconds left until the window resets
    pub fn reset_after_millis(&self, now: u64) -> u64 {
        self.reset.saturating_sub(now)
    }

    /// Compact self-describing encoding used by byte-oriented stores
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes bytes stored under `key`. Anything that does not describe a
    /// valid rate for that key is a decode failure, never a silent zero.
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
        let rate: Rate =
            serde_json::from_slice(bytes).map_err(|e| RateLimiterError::decode(key, e))?;
        rate.validate(key)?;
        Ok(rate)
    }

    pub(crate) fn validate(&self, key: &str) -> Result<()> {
        if self.key != key {
            return Err(RateLimiterError::decode(
                key,
                format!("record belongs to key '{}'", self.key),
            ));
        }
        if self.remaining > self.limit {
            return Err(RateLimiterError::decode(
                key,
                format!(
                    "remaining {} exceeds limit {}",
                    self.remaining, self.limit
                ),
            ));
        }
        Ok(())
    }
}

/// Result of applying one engine step to the stored state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State to persist
    pub rate: Rate,
    /// Whether the request that caused the step was admitted
    pub admitted: bool,
}

fn window_end(policy: &Policy, now: u64) -> u64 {
    now.saturating_add(policy.refresh_interval().as_millis() as u64)
}
