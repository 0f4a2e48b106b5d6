//! Error types for the replikit controllers.

use replikit_state::{Kind, StateError};
use thiserror::Error;

/// Result type alias for client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for controller-level operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors returned by [`Client`](crate::client::Client) calls.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("admission webhook {webhook} denied the request: {reason}")]
    Denied { webhook: String, reason: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("store task failed: {0}")]
    Task(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::State(e) if e.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::State(e) if e.is_conflict())
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, ClientError::Denied { .. })
    }
}

/// Errors produced while reconciling.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{object} is already controlled by {kind} {owner}")]
    AlreadyOwned {
        object: String,
        kind: Kind,
        owner: String,
    },

    #[error("cross-namespace owner reference: {object} cannot be owned by {owner}")]
    CrossNamespace { object: String, owner: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ControllerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Client(e) if e.is_not_found())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Client(e) if e.is_conflict())
    }
}
