//! Core error types

use thiserror::Error;

/// Core error type for Sigil
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration value failed validation
    #[error("Invalid configuration '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
