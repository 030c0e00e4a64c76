//! Error types for Sigil identity operations.

use sigil_core::CoreError;
use sigil_crypto::CryptoError;
use thiserror::Error;

/// Errors that can occur in identity, pairing and request-signing operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Wire value outside the known scope set
    #[error("Invalid authentication scope: {0}")]
    InvalidScope(u8),

    /// Scope requires an id the client identifier does not carry
    #[error("Scope {scope} requires a non-empty {component} id")]
    MissingIdentifier {
        scope: &'static str,
        component: &'static str,
    },

    /// Identity not registered
    #[error("Identity not found: {key_id}")]
    IdentityNotFound { key_id: String },

    /// Identity already registered
    #[error("Identity already exists: {key_id}")]
    IdentityExists { key_id: String },

    /// Pairing operation called in the wrong handshake state
    #[error("Invalid pairing transition: {0}")]
    InvalidTransition(String),

    /// Identity has no negotiated shared secret yet
    #[error("No shared secret negotiated for {key_id}")]
    MissingSecret { key_id: String },

    /// Hex wire value could not be decoded
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Backing store failure
    #[error("Key store error: {0}")]
    Store(String),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
