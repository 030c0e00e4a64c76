//! Error types for the RSA engine, key codecs and token codec.

use thiserror::Error;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Raw RSA input was not in `0..n`
    #[error("Message out of range: {message_bits}-bit value against {modulus_bits}-bit modulus")]
    MessageOutOfRange { message_bits: u64, modulus_bits: u64 },

    /// Bounded random generation would not terminate in reasonable time
    #[error("Intractable generation: {bit_length}-bit draw below a {max_bits}-bit bound")]
    IntractableGeneration { max_bits: u64, bit_length: u32 },

    /// Key generation ran out of prime-selection attempts
    #[error("Key generation exhausted after {attempts} attempts")]
    KeyGenerationExhausted { attempts: u32 },

    #[error("Invalid key length {bits}: {reason}")]
    InvalidKeyLength { bits: u32, reason: String },

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Cipher error: {0}")]
    Cipher(String),

    /// Background task panicked or was aborted
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
