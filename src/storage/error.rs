use crate::core::Error as CoreError;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer error type for the simwork queue.
///
/// Lost compare-and-swap races are not errors; they are reported as
/// [`UpdateOutcome::Conflict`](super::UpdateOutcome::Conflict).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(feature = "sqlite")]
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// A core serialization or deserialization error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Failed to connect to or configure the backing store.
    #[error("connection error: {0}")]
    Connection(String),

    /// The requested work item does not exist.
    #[error("work item not found: {0}")]
    WorkItemNotFound(Uuid),

    /// A work item with this id has already been inserted.
    #[error("duplicate work item: {0}")]
    DuplicateWorkItem(Uuid),

    /// The item handed to `update` does not carry `expected_version + 1`.
    #[error("version skew for work item {id}: expected {expected}, item carries {actual}")]
    VersionSkew { id: Uuid, expected: u64, actual: u64 },

    /// A stored row could not be mapped back to a work item.
    #[error("corrupt row for work item {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    /// A parameter was out of range for the backing store.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
