//! # Validation Errors
//!
//! Structured errors for domain primitive construction, built with
//! `thiserror`. Each variant carries the rejected input so operators can
//! diagnose bad requests without guesswork.

use thiserror::Error;

/// Validation errors for identifier newtypes and step names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Subject identifier is empty, too long, or contains whitespace.
    #[error("invalid subject id: \"{0}\" (expected 1-128 printable characters without whitespace)")]
    InvalidSubjectId(String),

    /// Provider transaction identifier is empty or too long.
    #[error("invalid transaction id: \"{0}\" (expected 1-256 characters)")]
    InvalidTransactionId(String),

    /// Session identifier is not a UUID.
    #[error("invalid session id: \"{0}\" (expected a UUID)")]
    InvalidSessionId(String),

    /// Step name does not match any known verification step.
    #[error("unknown verification step: \"{0}\"")]
    UnknownStep(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_rejected_input() {
        let err = ValidationError::UnknownStep("retina_scan".to_string());
        assert!(err.to_string().contains("retina_scan"));
        let err = ValidationError::InvalidSubjectId(String::new());
        assert!(err.to_string().contains("subject id"));
    }
}
