// src/algorithms/fixed_window.rs

use tracing::debug;

use crate::policy::Policy;
use crate::rate::{Rate, Transition};

/// What a single engine call does to a key's quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Take `units` from the quota, rejecting when fewer are left
    Consume(u64),
    /// Admit while any quota is left, without taking from it
    Probe,
    /// Charge `units` after the fact; saturates at zero and never rejects
    Settle(u64),
}

/// Fixed Window rate limiting algorithm
///
/// Each key owns a window that starts on first use and ends `refresh_interval`
/// later. The first access after the end starts a fresh window with the full
/// quota. Windows are anchored per key rather than aligned to the epoch.
///
/// The algorithm is a pure function of the stored state and the clock so that
/// storage backends can run it inside whatever atomic primitive they offer,
/// and retry it when a compare-and-swap loses.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWindow;

impl FixedWindow {
    /// Computes the next state of `key` for one step at time `now`
    pub fn apply(
        current: Option<Rate>,
        key: &str,
        policy: &Policy,
        step: Step,
        now: u64,
    ) -> Transition {
        let mut rate = match current {
            Some(mut rate) => {
                if rate.rebase(policy) {
                    debug!(key = key, limit = policy.limit(), "Policy limit changed");
                }
                if rate.is_expired(now) {
                    rate.roll_over(policy, now);
                }
                rate
            }
            None => Rate::fresh(key, policy, now),
        };

        let admitted = match step {
            Step::Consume(units) => {
                if rate.remaining < units {
                    false
                } else {
                    rate.remaining -= units;
                    true
                }
            }
            Step::Probe => rate.remaining > 0,
            Step::Settle(units) => {
                rate.remaining = rate.remaining.saturating_sub(units);
                true
            }
        };

        Transition { rate, admitted }
    }
}
