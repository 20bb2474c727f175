use super::work_item::WorkStatus;
use thiserror::Error;
use uuid::Uuid;

/// Core error type for the simwork queue.
///
/// Covers the two non-retryable failure classes of the domain model:
/// payloads that can never be constructed, and state transitions that the
/// work-item lifecycle forbids. Both indicate a caller or programming error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A work-type payload field failed construction-time validation.
    #[error("invalid {field}: {reason}")]
    InvalidPayload {
        field: &'static str,
        reason: String,
    },

    /// A lifecycle operation was invoked from a state that does not allow it.
    #[error("invalid transition for work item {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: WorkStatus,
        to: WorkStatus,
    },

    /// An unknown status string was read back from storage.
    #[error("invalid work status: {0}")]
    InvalidStatus(String),

    /// Serialization failed when encoding a value to bytes.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding bytes to a value.
    #[error("deserialization failed")]
    Deserialization(#[source] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_payload(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidPayload {
            field,
            reason: reason.into(),
        }
    }
}

pub type CoreError = Error;

/// Type-erased error returned by external collaborators such as handlers
/// and health probes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;
