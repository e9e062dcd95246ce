//! Coordinator errors

use gatekeep_api::SessionKind;
use gatekeep_host_api::HostError;
use gatekeep_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A {0} session is already active")]
    AlreadyActive(SessionKind),

    #[error("{collaborator} authorization denied: {reason}")]
    AuthorizationDenied {
        collaborator: &'static str,
        reason: String,
    },

    #[error("Failed to decode '{key}': {reason}")]
    PersistenceDecodeFailure { key: String, reason: String },

    #[error("Enforcement call failed: {0}")]
    EnforcementCallFailure(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Attribute a collaborator failure
    pub(crate) fn from_host(collaborator: &'static str, err: HostError) -> Self {
        match err {
            HostError::AuthorizationDenied(reason) => Self::AuthorizationDenied {
                collaborator,
                reason,
            },
            HostError::EnforcementRejected(reason) => Self::EnforcementCallFailure(reason),
            other => Self::CollaboratorUnavailable {
                collaborator,
                reason: other.to_string(),
            },
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
