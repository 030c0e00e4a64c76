//! Per-request signing and verification.
//!
//! Each request carries a fresh red token (random bytes with an embedded
//! expiry) and its blue signature `(red XOR S)^d mod n`, where `S` is the
//! secret negotiated at pairing time. The server recovers `red XOR S` with the
//! public key and compares it against its own copy of `S`.

use chrono::{DateTime, Duration, Utc};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sigil_core::TokenConfig;
use sigil_crypto::{
    bigint, generate_request_expire_token, parse_request_expire_time, BigUint, CryptoResult,
    PrivateKeyMaterial, PublicKeyMaterial, RsaEngine,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::client::{AuthLevel, ClientAuthenticationScope, ClientIdentifier, ClientKeyIdentifier};
use crate::error::{IdentityError, IdentityResult};
use crate::secret::{ct_eq_biguint, SharedSecret};
use crate::store::PublicKeyStore;

/// Red/blue token pair in integer form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestToken {
    pub red: BigUint,
    pub blue: BigUint,
}

impl RequestToken {
    pub fn to_security_token(&self, scope: ClientAuthenticationScope) -> SecurityToken {
        SecurityToken {
            scope,
            red: bigint::to_hex(&self.red),
            blue: bigint::to_hex(&self.blue),
        }
    }

    pub fn from_security_token(token: &SecurityToken) -> IdentityResult<Self> {
        let red = bigint::from_hex(&token.red)
            .ok_or_else(|| IdentityError::MalformedToken("red is not hex".into()))?;
        let blue = bigint::from_hex(&token.blue)
            .ok_or_else(|| IdentityError::MalformedToken("blue is not hex".into()))?;
        Ok(Self { red, blue })
    }

    /// Instant after which the token is rejected.
    pub fn expires_at(&self) -> DateTime<Utc> {
        parse_request_expire_time(&self.red)
    }
}

/// Wire form of a request token, one per scope the request is signed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityToken {
    pub scope: ClientAuthenticationScope,
    pub red: String,
    pub blue: String,
}

/// Client-side request signer.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    engine: RsaEngine,
    ttl: Duration,
}

impl RequestSigner {
    pub fn new(engine: RsaEngine, config: &TokenConfig) -> Self {
        Self::with_ttl(engine, config.request_ttl())
    }

    pub fn with_ttl(engine: RsaEngine, ttl: Duration) -> Self {
        Self { engine, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn sign<R: RngCore + CryptoRng + ?Sized>(
        &self,
        key: &PrivateKeyMaterial,
        secret: &SharedSecret,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> CryptoResult<RequestToken> {
        let red = generate_request_expire_token(self.ttl, now, rng);
        let blue = self.engine.sign(&(&red ^ secret.value()), key)?;
        Ok(RequestToken { red, blue })
    }
}

/// Checks one red/blue pair against a known key and secret.
///
/// Expiry is checked first, so a stale token is `RequestExpired` whether or
/// not its signature would have matched.
pub fn verify_request_token(
    engine: &RsaEngine,
    red: &BigUint,
    blue: &BigUint,
    key: &PublicKeyMaterial,
    secret: &SharedSecret,
    now: DateTime<Utc>,
) -> AuthLevel {
    if now > parse_request_expire_time(red) {
        return AuthLevel::RequestExpired;
    }

    let recovered = match engine.verify(blue, key) {
        Ok(value) => value,
        Err(_) => return AuthLevel::Unauthorized,
    };

    let expected = red ^ secret.value();
    if ct_eq_biguint(&recovered, &expected) {
        AuthLevel::Authorized
    } else {
        AuthLevel::Unauthorized
    }
}

/// Server-side verifier backed by the public key store.
#[derive(Clone)]
pub struct RequestVerifier {
    engine: RsaEngine,
    store: Arc<dyn PublicKeyStore>,
}

impl RequestVerifier {
    pub fn new(engine: RsaEngine, store: Arc<dyn PublicKeyStore>) -> Self {
        Self { engine, store }
    }

    pub async fn verify(
        &self,
        key_id: &ClientKeyIdentifier,
        token: &SecurityToken,
        now: DateTime<Utc>,
    ) -> AuthLevel {
        if token.scope != key_id.scope() {
            warn!(%key_id, token_scope = %token.scope, "Token scope does not match key identifier");
            return AuthLevel::Unauthorized;
        }

        let state = match self.store.get_client_state(key_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(%key_id, "No key on file");
                return AuthLevel::Unknown;
            }
            Err(e) => {
                error!(%key_id, error = %e, "Public key store lookup failed");
                return AuthLevel::Unknown;
            }
        };

        let Some(secret) = state.secret.as_ref() else {
            debug!(%key_id, "Key on file has no negotiated secret");
            return AuthLevel::Unknown;
        };
        if !state.trusted {
            debug!(%key_id, "Key on file is not trusted yet");
            return AuthLevel::Unverified;
        }

        let parsed = match RequestToken::from_security_token(token) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(%key_id, error = %e, "Rejecting malformed request token");
                return AuthLevel::Unauthorized;
            }
        };

        let level = verify_request_token(
            &self.engine,
            &parsed.red,
            &parsed.blue,
            &state.public_key,
            secret,
            now,
        );
        match level {
            AuthLevel::Authorized => debug!(%key_id, "Request authorized"),
            AuthLevel::RequestExpired => {
                warn!(%key_id, expired_at = %parsed.expires_at(), "Request token expired")
            }
            other => warn!(%key_id, level = %other, "Request signature rejected"),
        }
        level
    }

    /// Verifies every token a request carries, deriving each key identifier
    /// from `client` and the token's scope.
    pub async fn verify_request(
        &self,
        client: &ClientIdentifier,
        tokens: &[SecurityToken],
        now: DateTime<Utc>,
    ) -> Vec<(ClientAuthenticationScope, AuthLevel)> {
        let mut results = Vec::with_capacity(tokens.len());
        for token in tokens {
            let level = match ClientKeyIdentifier::from_client(client, token.scope) {
                Ok(key_id) => self.verify(&key_id, token, now).await,
                Err(e) => {
                    warn!(%client, scope = %token.scope, error = %e, "Token scope not bindable");
                    AuthLevel::Unknown
                }
            };
            results.push((token.scope, level));
        }
        results
    }
}
