use super::error::{CoreError, Result};
use super::retry::RetryPolicy;
use super::work_type::WorkType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Number of failures after which a work item stops being retried.
///
/// Three attempts beyond the first is enough to ride out a backend restart
/// while still surfacing a persistently broken handler within minutes.
pub const MAX_RETRIES: u32 = 3;

/// Lifecycle state of a work item.
///
/// Legal transitions:
///
/// ```text
/// Pending    -> Processing   start()
/// Failed     -> Processing   start()   (retry re-claim)
/// Processing -> Completed    complete()
/// Processing -> Failed       fail()
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "PENDING",
            WorkStatus::Processing => "PROCESSING",
            WorkStatus::Completed => "COMPLETED",
            WorkStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for WorkStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(WorkStatus::Pending),
            "PROCESSING" => Ok(WorkStatus::Processing),
            "COMPLETED" => Ok(WorkStatus::Completed),
            "FAILED" => Ok(WorkStatus::Failed),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable unit of background simulation work.
///
/// Every accepted mutation bumps `version` by exactly one. Stores use the
/// version as a compare-and-swap token: a caller mutates a copy locally, then
/// persists it with the version it read, and the write is rejected if anyone
/// else got there first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    id: Uuid,
    work_type: WorkType,
    status: WorkStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    retry_count: u32,
    version: u64,
}

impl WorkItem {
    /// Creates a pending work item stamped with the current time.
    pub fn create(work_type: WorkType) -> Self {
        Self::create_at(work_type, Utc::now())
    }

    /// Creates a pending work item with an explicit creation time.
    pub fn create_at(work_type: WorkType, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_type,
            status: WorkStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            retry_count: 0,
            version: 0,
        }
    }

    /// Rebuilds an item from a persisted row.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: Uuid,
        work_type: WorkType,
        status: WorkStatus,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        failed_at: Option<DateTime<Utc>>,
        error: Option<String>,
        retry_count: u32,
        version: u64,
    ) -> Self {
        Self {
            id,
            work_type,
            status,
            created_at,
            started_at,
            completed_at,
            failed_at,
            error,
            retry_count,
            version,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn work_type(&self) -> &WorkType {
        &self.work_type
    }

    pub fn status(&self) -> WorkStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Claims the item for processing.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_status(&[WorkStatus::Pending, WorkStatus::Failed], WorkStatus::Processing)?;
        self.status = WorkStatus::Processing;
        self.started_at = Some(Utc::now());
        self.version += 1;
        Ok(())
    }

    /// Records a successful outcome.
    pub fn complete(&mut self) -> Result<()> {
        self.ensure_status(&[WorkStatus::Processing], WorkStatus::Completed)?;
        self.status = WorkStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.error = None;
        self.failed_at = None;
        self.version += 1;
        Ok(())
    }

    /// Records a failed outcome and counts it against the retry budget.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.ensure_status(&[WorkStatus::Processing], WorkStatus::Failed)?;
        self.status = WorkStatus::Failed;
        self.failed_at = Some(Utc::now());
        self.error = Some(reason.into());
        self.retry_count += 1;
        self.version += 1;
        Ok(())
    }

    /// Returns true while the item has failed fewer than [`MAX_RETRIES`] times.
    ///
    /// This is the default budget only. A worker running a custom
    /// [`RetryPolicy`] decides with [`can_retry_under`](Self::can_retry_under).
    pub fn can_retry(&self) -> bool {
        self.can_retry_under(&RetryPolicy::STANDARD)
    }

    /// Returns true while `policy` still allows another attempt.
    pub fn can_retry_under(&self, policy: &RetryPolicy) -> bool {
        policy.allows_retry(self.retry_count)
    }

    /// Returns true if no further processing will happen under `policy`.
    pub fn is_terminal(&self, policy: &RetryPolicy) -> bool {
        match self.status {
            WorkStatus::Completed => true,
            WorkStatus::Failed => !policy.allows_retry(self.retry_count),
            WorkStatus::Pending | WorkStatus::Processing => false,
        }
    }

    fn ensure_status(&self, allowed: &[WorkStatus], to: WorkStatus) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            })
        }
    }
}
