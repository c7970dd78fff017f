//! Engine error handling
//!
//! All invariant violations are rejected synchronously before any mutation
//! is attempted (validate-then-commit). Persistence failures pass through
//! for the caller to retry; published state is never advanced past a failed
//! save.

use thiserror::Error;

/// Errors surfaced by the regime engine's writable operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("A fast is already running")]
    AlreadyFasting,

    #[error("No fast is currently running")]
    NoActiveSession,

    #[error("Plan is not active")]
    PlanInactive,

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_their_message() {
        let err = EngineError::Validation("Target duration must be positive".to_string());
        assert!(err.to_string().contains("Target duration"));
    }

    #[test]
    fn anyhow_errors_convert_to_internal() {
        let err: EngineError = anyhow::anyhow!("storage offline").into();
        assert!(matches!(err, EngineError::Internal(_)));
    }
}
