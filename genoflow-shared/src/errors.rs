//! Error types shared across genoflow crates.

use thiserror::Error;

/// Result alias used throughout genoflow.
pub type GenoflowResult<T> = Result<T, GenoflowError>;

/// Errors surfaced to orchestrator callers.
///
/// Stage failures are deliberately absent: a failing stage is recorded on the
/// workflow (see `WorkflowError`) and never travels up as a `GenoflowError`.
#[derive(Debug, Error)]
pub enum GenoflowError {
    /// Unknown workflow id (or other named resource).
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the workflow's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// State persistence failed. Fatal to the current operation.
    #[error("database error: {0}")]
    Database(String),

    /// Filesystem layout or on-disk storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenoflowError {
    /// Whether the error originated in the persistence layer.
    pub fn is_persistence(&self) -> bool {
        matches!(self, GenoflowError::Database(_) | GenoflowError::Storage(_))
    }
}

impl From<serde_json::Error> for GenoflowError {
    fn from(err: serde_json::Error) -> Self {
        GenoflowError::Serialization(err.to_string())
    }
}
