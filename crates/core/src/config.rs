//! Configuration management for Sigil.
//!
//! Every section has serde defaults, so a config file only needs to name the
//! values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Scope names accepted in `pairing.allowed_scopes`.
pub const KNOWN_SCOPES: [&str; 3] = ["client", "user", "userclient"];

/// Smallest modulus that can sign a request: the 16-byte red token plus the
/// 8 bits the pairing secret is kept below `n`.
pub const MIN_SIGNING_KEY_BITS: u32 = 136;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rsa: RsaConfig,
    pub token: TokenConfig,
    pub pairing: PairingConfig,
}

/// RSA key generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsaConfig {
    /// Modulus size for newly generated keys
    pub key_bits: u32,
    /// Miller-Rabin rounds per prime candidate
    pub primality_rounds: u32,
    /// Upper bound on prime-pair resamples before key generation gives up
    pub max_keygen_attempts: u32,
}

impl Default for RsaConfig {
    fn default() -> Self {
        Self {
            key_bits: 1024,
            primality_rounds: 20,
            max_keygen_attempts: 64,
        }
    }
}

/// Per-request token parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Lifetime embedded into each request token (milliseconds)
    pub request_ttl_ms: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            request_ttl_ms: 30_000,
        }
    }
}

impl TokenConfig {
    pub fn request_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.request_ttl_ms)
    }
}

/// Pairing handshake policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Whether previously unknown clients may pair at all
    pub allow_pairing: bool,
    /// Scopes a new pairing may bind to
    pub allowed_scopes: Vec<String>,
    /// Time a client has to answer the phase-1 challenge (milliseconds)
    pub challenge_timeout_ms: u64,
    /// Whether a trusted identity may pair again with a different key
    pub allow_key_replacement: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            allow_pairing: true,
            allowed_scopes: KNOWN_SCOPES.iter().map(|s| s.to_string()).collect(),
            challenge_timeout_ms: 30_000,
            allow_key_replacement: false,
        }
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CoreError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    /// Rejects values the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rsa.key_bits < MIN_SIGNING_KEY_BITS || self.rsa.key_bits % 2 != 0 {
            return Err(invalid(
                "rsa.key_bits",
                format!(
                    "must be even and at least {}, got {}",
                    MIN_SIGNING_KEY_BITS, self.rsa.key_bits
                ),
            ));
        }
        if self.rsa.primality_rounds == 0 {
            return Err(invalid("rsa.primality_rounds", "must be positive".into()));
        }
        if self.rsa.max_keygen_attempts == 0 {
            return Err(invalid("rsa.max_keygen_attempts", "must be positive".into()));
        }
        if self.token.request_ttl_ms <= 0 {
            return Err(invalid("token.request_ttl_ms", "must be positive".into()));
        }
        if let Some(unknown) = self
            .pairing
            .allowed_scopes
            .iter()
            .find(|s| !KNOWN_SCOPES.contains(&s.to_ascii_lowercase().as_str()))
        {
            return Err(invalid(
                "pairing.allowed_scopes",
                format!("unknown scope '{}'", unknown),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> CoreError {
    CoreError::InvalidConfig {
        field: field.to_string(),
        reason,
    }
}
