//! Error types for core identifier parsing.

use thiserror::Error;

/// Errors produced while parsing or validating core identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A package name failed validation.
    #[error("invalid package name '{name}': {reason}")]
    InvalidPackageName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A component name failed validation.
    #[error("invalid component name '{0}'")]
    InvalidComponentName(String),

    /// An unknown component kind string.
    #[error("unknown component kind '{0}'")]
    UnknownComponentKind(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
