use crate::core::{RetryPolicy, WorkStatus};
use chrono::{DateTime, Utc};

/// Parameters for fetching claimable work items.
///
/// Groups the batch bound and the retry-eligibility rule so every backend
/// applies the same filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimQuery {
    /// Maximum number of candidates to return.
    pub limit: usize,
    /// Failed items with `retry_count` at or above this are not returned.
    pub max_retries: u32,
    /// Failed items whose `failed_at` is later than this are not returned yet.
    pub retry_ready_before: DateTime<Utc>,
}

impl ClaimQuery {
    /// Builds the query a worker runs at `now` under `policy`.
    pub fn new(limit: usize, policy: &RetryPolicy, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            max_retries: policy.max_retries,
            retry_ready_before: policy.ready_cutoff(now),
        }
    }

    /// Applies the eligibility rule to a single item.
    pub fn admits(
        &self,
        status: WorkStatus,
        retry_count: u32,
        failed_at: Option<DateTime<Utc>>,
    ) -> bool {
        match status {
            WorkStatus::Pending => true,
            WorkStatus::Failed => {
                retry_count < self.max_retries
                    && failed_at.is_some_and(|at| at <= self.retry_ready_before)
            }
            WorkStatus::Processing | WorkStatus::Completed => false,
        }
    }
}

/// Result of a version-guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The write was applied; the stored item now carries the new version.
    Applied,
    /// Another writer changed the item first; nothing was written.
    Conflict { current_version: u64 },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }
}

/// Number of stored work items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }

    pub(crate) fn record(&mut self, status: WorkStatus, count: u64) {
        match status {
            WorkStatus::Pending => self.pending += count,
            WorkStatus::Processing => self.processing += count,
            WorkStatus::Completed => self.completed += count,
            WorkStatus::Failed => self.failed += count,
        }
    }
}
