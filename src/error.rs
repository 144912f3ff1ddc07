//! Error types for saga and timeout persistence.

use snafu::Snafu;
use uuid::Uuid;

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during persistence operations.
///
/// `ConcurrencyViolation` and `CommitConflict` mean another writer got
/// there first; callers should re-load and retry. `SagaNotFound` and
/// `TimeoutExists` are caller logic errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A by-id saga lookup found no stored entity.
    #[snafu(display("Saga with id {id} does not exist"))]
    SagaNotFound {
        /// The id that was looked up.
        id: Uuid,
    },

    /// A timeout with the same id is already stored.
    #[snafu(display("Timeout with id {id:?} already exists"))]
    TimeoutExists {
        /// The duplicate timeout id.
        id: String,
    },

    /// The stored version no longer matches the version captured when this
    /// saga instance was loaded.
    #[snafu(display(
        "Concurrency violation: expected version {expected}, found {found:?}"
    ))]
    ConcurrencyViolation {
        /// Version captured at load time.
        expected: u64,
        /// Version currently in the store (`None` if the version entry is gone).
        found: Option<u64>,
    },

    /// The store aborted the commit because a concurrent transaction wrote
    /// into this transaction's read-conflict range.
    #[snafu(display("Transaction conflict: a concurrent transaction committed first"))]
    CommitConflict,

    /// A write was attempted through a read-only (snapshot) transaction.
    #[snafu(display("Transaction is read-only"))]
    ReadOnly,

    /// Payload serialization or deserialization failed.
    #[snafu(display("Serialization error: {message}"))]
    Serialization {
        /// Description of the codec failure.
        message: String,
    },

    /// A stored key or value did not decode to its expected shape.
    #[snafu(display("Corrupted store entry: {reason}"))]
    Corrupted {
        /// Description of what was malformed.
        reason: String,
    },

    /// Invalid connection configuration.
    #[snafu(display("Invalid configuration: {reason}"))]
    Config {
        /// Description of the invalid setting.
        reason: String,
    },
}

impl Error {
    /// Whether the caller should re-load the affected state and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConcurrencyViolation { .. } | Error::CommitConflict
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_are_retryable() {
        assert!(Error::CommitConflict.is_retryable());
        assert!(Error::ConcurrencyViolation {
            expected: 3,
            found: Some(4)
        }
        .is_retryable());
        assert!(!Error::SagaNotFound { id: Uuid::nil() }.is_retryable());
        assert!(!Error::TimeoutExists { id: "t".into() }.is_retryable());
    }
}
