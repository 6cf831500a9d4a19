//! Error types for the subject domain.

use crate::subscriptions::DropReason;
use crate::types::{SubjectId, SubjectKind};
use thiserror::Error;

/// A buffered change record that was rejected while the pending queue was
/// being replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedChange {
    /// Position of the record in receipt order (1-based).
    pub position: usize,
    pub id: SubjectId,
    pub reason: String,
}

/// Main error type for domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot decode {kind} {id}: {reason}")]
    Decode {
        id: SubjectId,
        kind: SubjectKind,
        reason: String,
    },

    #[error("Subject {id} is registered as {registered}, not {requested}")]
    TypeMismatch {
        id: SubjectId,
        requested: SubjectKind,
        registered: SubjectKind,
    },

    #[error("Invalid change record: {0}")]
    InvalidRecord(String),

    #[error("Replay rejected {} buffered change(s), applied {applied}", .failures.len())]
    ReplayRejected {
        applied: usize,
        failures: Vec<RejectedChange>,
    },

    #[error("Pending change queue is full ({limit} records)")]
    PendingQueueFull { limit: usize },

    #[error("Subject already exists: {0}")]
    AlreadyExists(SubjectId),

    #[error("Subject has been deleted: {0}")]
    SubjectDeleted(SubjectId),

    #[error("Subject has no fields yet: {0}")]
    NotPopulated(SubjectId),

    #[error("Subject {0} changed during a local update")]
    UpdateConflict(SubjectId),

    #[error("Subscription dropped: {0:?}")]
    SubscriptionDropped(DropReason),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Serialization(e.to_string())
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
