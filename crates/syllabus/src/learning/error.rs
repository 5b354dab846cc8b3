use tracing::error;

use super::repository::{ArtifactError, RepositoryError};

/// Typed failure returned by every engine operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(reason.into())
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            EngineError::Unauthorized => "unauthorized",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::NotFound(_) => "not_found",
            EngineError::BadRequest(_) => "bad_request",
            EngineError::Conflict(_) => "conflict",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<RepositoryError> for EngineError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict => Self::Conflict("record already exists".to_string()),
            RepositoryError::NotFound => Self::NotFound("record".to_string()),
            RepositoryError::CapacityReached { limit } => {
                Self::Forbidden(format!("enrollment limit reached ({limit})"))
            }
            RepositoryError::StaleStatus { expected, found } => Self::BadRequest(format!(
                "enrollment is {} (expected {})",
                found.label(),
                expected.label()
            )),
            RepositoryError::Blocked(status) => Self::BadRequest(format!(
                "an enrollment is still {}",
                status.label()
            )),
            RepositoryError::AttemptsExhausted { limit } => {
                Self::BadRequest(format!("no attempts remaining (limit {limit})"))
            }
            RepositoryError::StaleSettings { expected, current } => Self::Conflict(format!(
                "settings changed concurrently (expected version {expected}, current {current})"
            )),
            RepositoryError::Unavailable(reason) => {
                error!(%reason, "record store failure");
                Self::Internal("record store unavailable".to_string())
            }
        }
    }
}

impl From<ArtifactError> for EngineError {
    fn from(value: ArtifactError) -> Self {
        error!(error = %value, "artifact generation failed");
        Self::Internal("artifact generation failed".to_string())
    }
}
