// =============================================================================
// WORK ITEM RETRY BEHAVIOR
// =============================================================================
//
// A failing handler never retries in-process. `fail()` records the attempt and
// leaves the item `Failed`; a later poll cycle re-claims it once two conditions
// hold:
//
// 1. BUDGET: `retry_count < max_retries`
// 2. DELAY:  `failed_at + retry_delay <= now`
//
// Once the budget is spent the item is terminal and the worker reports it with
// `WorkItemFailed { retry_exhausted: true }`.
// =============================================================================

use super::work_item::MAX_RETRIES;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controls how often and how soon failed work items are re-claimed.
///
/// # Examples
///
/// ```rust
/// use simwork::core::RetryPolicy;
/// use std::time::Duration;
///
/// const PATIENT: RetryPolicy = RetryPolicy {
///     max_retries: 5,
///     retry_delay: Duration::from_secs(30),
/// };
///
/// assert!(PATIENT.allows_retry(4));
/// assert!(!PATIENT.allows_retry(5));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of failures after which the item is no longer re-claimed.
    pub max_retries: u32,

    /// Minimum time between a failure and the next claim of the same item.
    ///
    /// The poll interval is added on top of this, so the effective delay is
    /// `retry_delay` plus up to one poll interval.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Three retries, each no sooner than five seconds after the failure.
    pub const STANDARD: Self = Self {
        max_retries: MAX_RETRIES,
        retry_delay: Duration::from_secs(5),
    };

    /// Three retries, eligible on the very next poll cycle.
    pub const IMMEDIATE: Self = Self {
        max_retries: MAX_RETRIES,
        retry_delay: Duration::ZERO,
    };

    /// Never retry; the first failure is terminal.
    pub const NONE: Self = Self {
        max_retries: 0,
        retry_delay: Duration::ZERO,
    };

    /// Returns true if an item that has failed `retry_count` times may run again.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Latest `failed_at` that is eligible for re-claim at `now`.
    pub fn ready_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.retry_delay) {
            Ok(delay) => now.checked_sub_signed(delay).unwrap_or(DateTime::<Utc>::MIN_UTC),
            Err(_) => DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}
