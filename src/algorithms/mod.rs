// src/algorithms/mod.rs

pub mod fixed_window;

#[cfg(test)]
mod tests;

pub use fixed_window::{FixedWindow, Step};

use crate::rate::Rate;

/// Status returned by rate limiting operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Key the decision was taken for
    pub key: String,

    /// Whether the request was admitted
    pub admitted: bool,

    /// Quota ceiling of the window
    pub limit: u64,

    /// Quota left in the current window
    pub remaining: u64,

    /// End of the current window, epoch milliseconds
    pub reset: u64,

    /// Set when the backend failed and the fail mode decided instead
    pub degraded: bool,
}

impl RateLimitStatus {
    pub(crate) fn from_rate(rate: &Rate, admitted: bool) -> Self {
        Self {
            key: rate.key.clone(),
            admitted,
            limit: rate.limit,
            remaining: rate.remaining,
            reset: rate.reset,
            degraded: false,
        }
    }

    /// Milliseconds until the window resets, measured from `now`
    pub fn reset_after_millis(&self, now: u64) -> u64 {
        self.reset.saturating_sub(now)
    }
}
