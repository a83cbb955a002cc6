// library entry
pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod policy;
pub mod rate;
pub mod resilience;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use algorithms::{FixedWindow, RateLimitStatus, Step};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FailMode, RateLimitProperties, RateLimiterConfig};
pub use error::{RateLimiterError, Result};
pub use limiter::{RateLimitOutcome, RateLimiter};
pub use logging::init as init_logging;
pub use policy::{Discriminator, Policy, PolicyResolver, QuotaType, RouteContext};
pub use rate::Rate;
pub use storage::StorageBackend;
