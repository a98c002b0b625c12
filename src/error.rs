//! Error types for the cognitive core

use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Error taxonomy shared by every component of the core.
///
/// Variants are kinds, not component-specific types: the same `NotFound`
/// covers a missing atom, tenant, agent, or pipeline, with the payload
/// naming the offender.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Tenant mismatch: atom {id} belongs to a different tenant")]
    TenantMismatch { id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Component is closed")]
    Closed,

    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },
}

impl CoreError {
    /// Deterministic mapping to the HTTP status code the outer surface uses.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::AlreadyExists(_) => 409,
            CoreError::NotFound(_) => 404,
            CoreError::TenantMismatch { .. } => 403,
            CoreError::InvalidInput(_) => 400,
            CoreError::Cancelled => 499,
            CoreError::DeadlineExceeded => 504,
            CoreError::Closed => 503,
            CoreError::StageFailed { .. } => 500,
        }
    }

    /// True when the failure is attributable to the caller.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500 && self.status_code() != 499
    }

    /// Wrap a stage error, preserving the failing stage's name.
    pub fn stage_failed(stage: &str, source: &CoreError) -> Self {
        CoreError::StageFailed {
            stage: stage.to_string(),
            reason: source.to_string(),
        }
    }
}
