//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Username was empty after trimming whitespace
    #[error("Username must not be empty")]
    EmptyUsername,

    /// Username exceeded the configured length
    #[error("Username too long: {length} characters (max: {max})")]
    UsernameTooLong { length: usize, max: usize },

    /// Username contained a control character
    #[error("Username contains control character {0:?}")]
    UsernameControlChar(char),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
