//! Backend error types.

use thiserror::Error;

use super::events::Collection;

/// Errors surfaced by a [`super::Backend`] implementation.
///
/// The store treats `Network` and `Unauthorized` identically (roll back the
/// optimistic mutation, return the error); `UniqueViolation` is recognized
/// on the invitation path and translated into a friendlier store error.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Transport or server failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend's row-level authorization rejected the operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Record not found in {collection}: {id}")]
    NotFound { collection: Collection, id: String },

    /// Duplicate key, e.g. re-inviting an already-invited email.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A named procedure failed server-side.
    #[error("Procedure {procedure} failed: {message}")]
    Rpc { procedure: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The realtime channel is gone and will not deliver further events.
    #[error("Event channel closed")]
    ChannelClosed,
}

impl BackendError {
    pub fn network(message: impl Into<String>) -> Self {
        BackendError::Network(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        BackendError::Unauthorized(message.into())
    }

    pub fn not_found(collection: Collection, id: impl Into<String>) -> Self {
        BackendError::NotFound {
            collection,
            id: id.into(),
        }
    }

    pub fn unique_violation(constraint: impl Into<String>) -> Self {
        BackendError::UniqueViolation {
            constraint: constraint.into(),
        }
    }

    pub fn rpc(procedure: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Rpc {
            procedure: procedure.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a duplicate-key signature.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, BackendError::UniqueViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackendError::not_found(Collection::Tasks, "t-404");
        assert_eq!(err.to_string(), "Record not found in tasks: t-404");

        let err = BackendError::rpc("complete_task_atomic", "timeout");
        assert_eq!(
            err.to_string(),
            "Procedure complete_task_atomic failed: timeout"
        );
    }

    #[test]
    fn test_unique_violation_detection() {
        assert!(BackendError::unique_violation("team_invitations_email_key")
            .is_unique_violation());
        assert!(!BackendError::network("boom").is_unique_violation());
    }
}
