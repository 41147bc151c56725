//! Shared primitives for all Rust crates in Lariat.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used across Lariat crates.
pub type AppResult<T> = Result<T, AppError>;

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true for lease contention or loss.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true for errors that end a claim: contention or a vanished
    /// lease row.
    #[must_use]
    pub fn is_claim_loss(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn conflict_is_detected() {
        assert!(AppError::Conflict("lease is held".to_owned()).is_conflict());
        assert!(!AppError::NotFound("missing lease".to_owned()).is_conflict());
    }

    #[test]
    fn claim_loss_covers_conflict_and_not_found() {
        assert!(AppError::Conflict("lease is held".to_owned()).is_claim_loss());
        assert!(AppError::NotFound("missing lease".to_owned()).is_claim_loss());
        assert!(!AppError::Internal("connection reset".to_owned()).is_claim_loss());
    }

    #[test]
    fn errors_format_with_category_prefix() {
        let error = AppError::Validation("resource must not be empty".to_owned());
        assert_eq!(
            error.to_string(),
            "validation error: resource must not be empty"
        );
    }
}
