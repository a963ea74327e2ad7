//! Store error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors returned by store operations.
///
/// `Validation` and the rule-check variants fire before any state is
/// touched. `Backend` means a remote write failed *after* the optimistic
/// mutation was applied; the store has already rolled the mutation back by
/// the time the caller sees it. Benign races (losing an atomic completion,
/// claiming an already-claimed task) are not errors at all.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Rejected input. Raised before any state mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote write or auth failure, surfaced after rollback.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// An open invitation for this address already exists.
    #[error("An invitation for {email} already exists")]
    AlreadyInvited { email: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invitation is invalid or no longer open")]
    InvalidInvitation,

    /// The requested `reports_to` change would close a reporting loop.
    #[error("Reporting change would create a cycle")]
    HierarchyCycle,
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        StoreError::PermissionDenied(message.into())
    }
}
