//! Compact 64-bit key identity used for lookup and equality.
//!
//! Not collision resistant at full strength; never make a trust decision
//! on a thumbprint alone.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{PrivateKeyMaterial, PublicKeyMaterial};

/// Two little-endian words taken from the first 8 bytes of a SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyThumbprint {
    low: u32,
    high: u32,
}

impl KeyThumbprint {
    pub fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    /// Hashes the big-endian bytes of the modulus.
    pub fn from_public_key(key: &PublicKeyMaterial) -> Self {
        let digest = Sha256::digest(key.n().to_bytes_be());
        Self::from_digest(&digest)
    }

    pub fn from_private_key(key: &PrivateKeyMaterial) -> Self {
        Self::from_public_key(key.public_key())
    }

    /// Encrypts the key under itself with an all-zero nonce and hashes the
    /// ciphertext.
    pub fn from_symmetric_key(key: &[u8; 32]) -> CryptoResult<Self> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let nonce = Nonce::from_slice(&[0u8; 12]);
        let ciphertext = cipher
            .encrypt(nonce, &key[..])
            .map_err(|e| CryptoError::Cipher(e.to_string()))?;
        Ok(Self::from_digest(&Sha256::digest(&ciphertext)))
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self::from_digest(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.low.to_le_bytes());
        out[4..].copy_from_slice(&self.high.to_le_bytes());
        out
    }

    pub fn words(&self) -> (u32, u32) {
        (self.low, self.high)
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut low = [0u8; 4];
        let mut high = [0u8; 4];
        low.copy_from_slice(&digest[0..4]);
        high.copy_from_slice(&digest[4..8]);
        Self {
            low: u32::from_le_bytes(low),
            high: u32::from_le_bytes(high),
        }
    }
}

impl Hash for KeyThumbprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.low);
    }
}

impl fmt::Display for KeyThumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}
