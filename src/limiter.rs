// src/limiter.rs

//! The rate limiting engine.
//!
//! The engine holds no rate state of its own. For every applicable policy it
//! runs one atomic backend update and then folds the per-key decisions into a
//! single outcome. Backend failures never reach the caller of [`evaluate`];
//! they are turned into degraded decisions according to the fail mode.
//!
//! [`evaluate`]: RateLimiter::evaluate

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

use crate::algorithms::{FixedWindow, RateLimitStatus, Step};
use crate::clock::{Clock, SystemClock};
use crate::config::{FailMode, RateLimiterConfig};
use crate::error::{RateLimiterError, Result};
use crate::policy::{Policy, PolicyResolver, QuotaType, ResolvedPolicy, RouteContext};
use crate::rate::{Rate, Transition};
use crate::storage::StorageBackend;
use crate::{rate_limit_event, storage_op};

/// Aggregated decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitOutcome {
    /// True only if every applicable policy admitted the request
    pub admitted: bool,
    /// Headline values of the most restrictive decision
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
    /// True if any decision came from the fail mode
    pub degraded: bool,
    /// Per-key decisions in policy declaration order
    pub statuses: Vec<RateLimitStatus>,
}

impl RateLimitOutcome {
    /// Folds per-key decisions; `None` when there are none.
    ///
    /// Among rejected decisions if there are any, otherwise among all, the one
    /// with the lowest `remaining` and then the soonest `reset` is reported.
    /// Ties go to the decision that was evaluated first.
    pub fn aggregate(statuses: Vec<RateLimitStatus>) -> Option<Self> {
        let admitted = statuses.iter().all(|s| s.admitted);

        let mut headline: Option<&RateLimitStatus> = None;
        for status in statuses.iter().filter(|s| admitted || !s.admitted) {
            let tighter = match headline {
                None => true,
                Some(best) => (status.remaining, status.reset) < (best.remaining, best.reset),
            };
            if tighter {
                headline = Some(status);
            }
        }

        let (limit, remaining, reset) = headline.map(|s| (s.limit, s.remaining, s.reset))?;
        Some(Self {
            admitted,
            limit,
            remaining,
            reset,
            degraded: statuses.iter().any(|s| s.degraded),
            statuses,
        })
    }
}

/// Rate limiter engine over a storage backend
#[derive(Debug)]
pub struct RateLimiter<S: StorageBackend> {
    storage: Arc<S>,
    resolver: PolicyResolver,
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
}

impl<S: StorageBackend> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            resolver: self.resolver.clone(),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: StorageBackend> RateLimiter<S> {
    pub fn new(storage: Arc<S>, resolver: PolicyResolver, config: RateLimiterConfig) -> Self {
        Self {
            storage,
            resolver,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock, mainly for tests and simulations
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Takes `units` from the quota of `key` in one atomic backend update.
    ///
    /// Backend errors and timeouts are returned as they are; the fail mode
    /// only applies in [`RateLimiter::evaluate`].
    pub async fn consume(&self, key: &str, policy: &Policy, units: u64) -> Result<RateLimitStatus> {
        self.apply(key, policy, Step::Consume(units)).await
    }

    /// Decides whether the request described by `ctx` may proceed.
    ///
    /// Returns `None` when no policy applies, which is different from a
    /// rejection: the request is not rate limited at all.
    #[instrument(level = "debug", skip(self, ctx), fields(route = ctx.route_id.as_deref().unwrap_or("-")))]
    pub async fn evaluate(&self, ctx: &RouteContext) -> Option<RateLimitOutcome> {
        let pairs = self.resolver.resolve(ctx);
        if pairs.is_empty() {
            return None;
        }

        let mut statuses = Vec::with_capacity(pairs.len());
        for ResolvedPolicy { key, policy } in &pairs {
            let step = match policy.quota_type() {
                QuotaType::Requests => Step::Consume(1),
                // Response time is only known afterwards, see record_response
                QuotaType::ResponseTime => Step::Probe,
            };
            let status = match self.apply(key, policy, step).await {
                Ok(status) => status,
                Err(e) => self.degrade(key, policy, &e, "evaluate"),
            };
            rate_limit_event!(key.as_str(), status.admitted, status.limit, status.remaining);
            statuses.push(status);
        }

        RateLimitOutcome::aggregate(statuses)
    }

    /// Charges the upstream response time of a finished request to every
    /// response-time policy of its route. Never rejects.
    pub async fn record_response(&self, ctx: &RouteContext, elapsed: Duration) -> Vec<RateLimitStatus> {
        let elapsed_ms = elapsed.as_millis() as u64;
        let mut statuses = Vec::new();

        for ResolvedPolicy { key, policy } in self.resolver.resolve(ctx) {
            if policy.quota_type() != QuotaType::ResponseTime {
                continue;
            }
            let status = match self.apply(&key, &policy, Step::Settle(elapsed_ms)).await {
                Ok(status) => status,
                Err(e) => {
                    let mut status = self.degrade(&key, &policy, &e, "record_response");
                    status.admitted = true;
                    status
                }
            };
            statuses.push(status);
        }

        statuses
    }

    /// Current state of `key` without changing it
    pub async fn status(&self, key: &str) -> Result<Option<Rate>> {
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, self.storage.load(key))
            .await
            .map_err(|_| RateLimiterError::timed_out("load", key, timeout))?
    }

    /// Starts a new full window for `key` right away
    pub async fn reset(&self, key: &str, policy: &Policy) -> Result<()> {
        let rate = Rate::fresh(key, policy, self.clock.now_millis());
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, self.storage.save(&rate))
            .await
            .map_err(|_| RateLimiterError::timed_out("save", key, timeout))?
    }

    async fn apply(&self, key: &str, policy: &Policy, step: Step) -> Result<RateLimitStatus> {
        let clock = Arc::clone(&self.clock);
        let mutate = move |current: Option<Rate>| -> Transition {
            FixedWindow::apply(current, key, policy, step, clock.now_millis())
        };

        let started = Instant::now();
        let timeout = self.config.timeout;
        let result = match tokio::time::timeout(timeout, self.storage.update(key, &mutate)).await {
            Ok(result) => result,
            Err(_) => Err(RateLimiterError::timed_out("update", key, timeout)),
        };
        storage_op!(
            self.storage.name(),
            "update",
            key,
            result,
            started.elapsed().as_millis() as u64
        );

        let transition = result?;
        Ok(RateLimitStatus::from_rate(&transition.rate, transition.admitted))
    }

    // Emits the single warning for a failed step
    fn degrade(
        &self,
        key: &str,
        policy: &Policy,
        error: &RateLimiterError,
        operation: &'static str,
    ) -> RateLimitStatus {
        let now = self.clock.now_millis();
        let admitted = self.config.fail_mode == FailMode::Open;
        warn!(
            key = key,
            operation = operation,
            backend = self.storage.name(),
            fail_mode = ?self.config.fail_mode,
            error = %error,
            "Rate limit enforcement degraded"
        );

        RateLimitStatus {
            key: key.to_string(),
            admitted,
            limit: policy.limit(),
            remaining: if admitted { policy.limit() } else { 0 },
            reset: now + policy.refresh_interval().as_millis() as u64,
            degraded: true,
        }
    }
}
