//! Two-phase pairing handshake.
//!
//! # Protocol Flow
//!
//! 1. Client → Server: identity, scope and public key. If the server already
//!    trusts that exact key the client is authorized immediately. Otherwise
//!    the server draws a secret `S < n`, encrypts it with the presented key
//!    and returns the challenge `S^e mod n`.
//! 2. Client → Server: `S` recovered with the private key. A matching answer
//!    stores the key as trusted together with `S`, which then keys every
//!    signed request.
//!
//! Attempts are tracked per [`ClientKeyIdentifier`]. A challenge must be
//! answered within `PairingConfig::challenge_timeout_ms`, and an attempt is
//! forgotten once that long has passed since its last transition.

use chrono::{DateTime, Duration, Utc};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sigil_core::{Clock, CoreError, PairingConfig, MIN_SIGNING_KEY_BITS};
use sigil_crypto::{
    bigint, generate_bounded_random, KeyThumbprint, PrivateKeyMaterial, PublicKeyMaterial,
    RsaEngine,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::client::{ClientAuthenticationScope, ClientIdentifier, ClientKeyIdentifier};
use crate::error::{IdentityError, IdentityResult};
use crate::secret::SharedSecret;
use crate::store::{PublicKeyStore, ServerAuthState};

/// Bits by which the secret is kept shorter than the modulus, so that
/// `red XOR S` always stays below `n`.
pub const SECRET_BIT_MARGIN: u32 = 8;

/// Attempts tracked at once. `begin` is rejected while the table is full of
/// attempts younger than the challenge timeout.
pub const MAX_TRACKED_ATTEMPTS: usize = 4096;

/// Server reply to phase 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthStep1Result {
    /// Phase 1 accepted (already trusted, or a challenge was issued)
    pub first_turn_success: bool,
    /// A challenge was issued and must be answered
    pub second_turn_required: bool,
    /// Hex challenge `S^e mod n`
    pub response_token: Option<String>,
    pub error_message: Option<String>,
}

impl AuthStep1Result {
    fn authorized() -> Self {
        Self {
            first_turn_success: true,
            second_turn_required: false,
            response_token: None,
            error_message: None,
        }
    }

    fn challenge(token: String) -> Self {
        Self {
            first_turn_success: true,
            second_turn_required: true,
            response_token: Some(token),
            error_message: None,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            first_turn_success: false,
            second_turn_required: false,
            response_token: None,
            error_message: Some(message.into()),
        }
    }
}

/// Client answer to phase 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConditionalToken {
    pub success: bool,
    /// Hex of the recovered secret
    pub token: Option<String>,
}

impl ConditionalToken {
    pub fn failed() -> Self {
        Self {
            success: false,
            token: None,
        }
    }

    /// The recovered secret, if the answer carries one.
    pub fn secret(&self) -> Option<SharedSecret> {
        self.token
            .as_deref()
            .filter(|_| self.success)
            .and_then(SharedSecret::from_hex)
    }
}

/// Handshake state of one key identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingState {
    Start,
    AwaitingChallengeDecode,
    Authorized,
    Rejected,
}

#[derive(Debug)]
struct PendingChallenge {
    client_info: ClientIdentifier,
    scope: ClientAuthenticationScope,
    public_key: PublicKeyMaterial,
    secret: SharedSecret,
    issued_at: DateTime<Utc>,
}

#[derive(Debug)]
enum Attempt {
    Awaiting(PendingChallenge),
    Authorized,
    Rejected,
}

impl Attempt {
    fn state(&self) -> PairingState {
        match self {
            Self::Awaiting(_) => PairingState::AwaitingChallengeDecode,
            Self::Authorized => PairingState::Authorized,
            Self::Rejected => PairingState::Rejected,
        }
    }
}

#[derive(Debug)]
struct TrackedAttempt {
    attempt: Attempt,
    updated_at: DateTime<Utc>,
}

/// Server half of the pairing handshake.
pub struct PairingServer {
    engine: RsaEngine,
    store: Arc<dyn PublicKeyStore>,
    clock: Arc<dyn Clock>,
    allow_pairing: bool,
    allowed_scopes: HashSet<ClientAuthenticationScope>,
    allow_key_replacement: bool,
    challenge_timeout: Duration,
    attempts: Mutex<HashMap<ClientKeyIdentifier, TrackedAttempt>>,
}

impl PairingServer {
    pub fn new(
        engine: RsaEngine,
        store: Arc<dyn PublicKeyStore>,
        clock: Arc<dyn Clock>,
        config: &PairingConfig,
    ) -> IdentityResult<Self> {
        let allowed_scopes = config
            .allowed_scopes
            .iter()
            .map(|name| {
                name.parse::<ClientAuthenticationScope>().map_err(|_| {
                    IdentityError::Core(CoreError::InvalidConfig {
                        field: "pairing.allowed_scopes".into(),
                        reason: format!("unknown scope '{}'", name),
                    })
                })
            })
            .collect::<IdentityResult<HashSet<_>>>()?;

        let timeout_ms = i64::try_from(config.challenge_timeout_ms).unwrap_or(i64::MAX);

        Ok(Self {
            engine,
            store,
            clock,
            allow_pairing: config.allow_pairing,
            allowed_scopes,
            allow_key_replacement: config.allow_key_replacement,
            challenge_timeout: Duration::milliseconds(timeout_ms),
            attempts: Mutex::new(HashMap::new()),
        })
    }

    /// Current handshake state for `key_id`; `Start` if never seen or
    /// already forgotten.
    pub fn state(&self, key_id: &ClientKeyIdentifier) -> PairingState {
        let now = self.clock.now();
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key_id)
            .filter(|tracked| !self.is_stale(tracked, now))
            .map(|tracked| tracked.attempt.state())
            .unwrap_or(PairingState::Start)
    }

    /// Number of attempts currently held in memory.
    pub fn tracked_attempts(&self) -> usize {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Phase 1.
    ///
    /// Returns `Err` only when the client identifier cannot be keyed under
    /// `scope` or the store fails; policy rejections come back as an
    /// unsuccessful [`AuthStep1Result`].
    pub async fn begin<R: RngCore + CryptoRng + Send + ?Sized>(
        &self,
        client: &ClientIdentifier,
        scope: ClientAuthenticationScope,
        public_key: &PublicKeyMaterial,
        rng: &mut R,
    ) -> IdentityResult<AuthStep1Result> {
        let key_id = ClientKeyIdentifier::from_client(client, scope)?;
        let thumbprint = KeyThumbprint::from_public_key(public_key);

        if let Some(state) = self.store.get_client_state(&key_id).await? {
            if state.trusted && state.public_key == *public_key {
                info!(%key_id, %thumbprint, "Known key, pairing not required");
                self.set_attempt(key_id, Attempt::Authorized);
                return Ok(AuthStep1Result::authorized());
            }
            if state.trusted {
                let on_file = KeyThumbprint::from_public_key(&state.public_key);
                if !self.allow_key_replacement {
                    warn!(%key_id, %thumbprint, %on_file, "Different key presented for trusted identity, rejecting");
                    self.set_attempt(key_id, Attempt::Rejected);
                    return Ok(AuthStep1Result::rejected(
                        "Identity is already paired with a different key",
                    ));
                }
                warn!(%key_id, %thumbprint, %on_file, "Different key presented for trusted identity, re-pairing");
            } else {
                debug!(%key_id, %thumbprint, "Key on file is untrusted, re-pairing");
            }
        }

        if !self.allow_pairing {
            warn!(%key_id, "Pairing disabled, rejecting unknown key");
            self.set_attempt(key_id, Attempt::Rejected);
            return Ok(AuthStep1Result::rejected("Pairing of new clients is disabled"));
        }
        if !self.allowed_scopes.contains(&scope) {
            warn!(%key_id, %scope, "Pairing not allowed for scope");
            self.set_attempt(key_id, Attempt::Rejected);
            return Ok(AuthStep1Result::rejected(format!(
                "Pairing is not allowed for scope '{}'",
                scope
            )));
        }

        if public_key.key_length_bits() < MIN_SIGNING_KEY_BITS {
            warn!(%key_id, bits = public_key.key_length_bits(), "Key too small to sign requests");
            self.set_attempt(key_id, Attempt::Rejected);
            return Ok(AuthStep1Result::rejected(format!(
                "Key must be at least {} bits",
                MIN_SIGNING_KEY_BITS
            )));
        }
        if !self.has_room_for(&key_id) {
            warn!(%key_id, "Too many pairing attempts in progress");
            return Ok(AuthStep1Result::rejected(
                "Too many pairing attempts in progress, retry later",
            ));
        }

        let secret_bits = public_key
            .key_length_bits()
            .saturating_sub(SECRET_BIT_MARGIN);
        let secret = SharedSecret::new(generate_bounded_random(public_key.n(), secret_bits, rng)?);
        let challenge = self.engine.verify(secret.value(), public_key)?;

        info!(%key_id, %thumbprint, "Issued pairing challenge");
        self.set_attempt(
            key_id,
            Attempt::Awaiting(PendingChallenge {
                client_info: client.sanitized(scope),
                scope,
                public_key: public_key.clone(),
                secret,
                issued_at: self.clock.now(),
            }),
        );

        Ok(AuthStep1Result::challenge(bigint::to_hex(&challenge)))
    }

    /// Phase 2. Valid only while `key_id` awaits a challenge answer.
    pub async fn complete(
        &self,
        key_id: &ClientKeyIdentifier,
        answer: &ConditionalToken,
    ) -> IdentityResult<PairingState> {
        let now = self.clock.now();
        let pending = {
            let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
            // A late answer for this key still gets reported as Rejected.
            let own = attempts.remove(key_id);
            self.evict_stale(&mut attempts, now);
            match own {
                Some(TrackedAttempt {
                    attempt: Attempt::Awaiting(pending),
                    ..
                }) => {
                    // Rejected until the answer checks out.
                    attempts.insert(
                        key_id.clone(),
                        TrackedAttempt {
                            attempt: Attempt::Rejected,
                            updated_at: now,
                        },
                    );
                    pending
                }
                other => {
                    let other = other.filter(|tracked| !self.is_stale(tracked, now));
                    let state = other
                        .as_ref()
                        .map(|tracked| tracked.attempt.state())
                        .unwrap_or(PairingState::Start);
                    if let Some(tracked) = other {
                        attempts.insert(key_id.clone(), tracked);
                    }
                    return Err(IdentityError::InvalidTransition(format!(
                        "{} is in state {:?}, no challenge outstanding",
                        key_id, state
                    )));
                }
            }
        };

        let elapsed = now - pending.issued_at;
        if elapsed > self.challenge_timeout {
            warn!(%key_id, elapsed_ms = elapsed.num_milliseconds(), "Challenge answered too late");
            return Ok(PairingState::Rejected);
        }

        let accepted = answer
            .secret()
            .is_some_and(|value| pending.secret.matches(value.value()));
        if !accepted {
            warn!(%key_id, "Challenge answer rejected");
            return Ok(PairingState::Rejected);
        }

        let thumbprint = KeyThumbprint::from_public_key(&pending.public_key);
        self.store
            .update_client_state(ServerAuthState {
                client_info: pending.client_info,
                key_scope: pending.scope,
                trusted: true,
                public_key: pending.public_key,
                secret: Some(pending.secret),
            })
            .await?;

        info!(%key_id, %thumbprint, "Pairing complete");
        self.set_attempt(key_id.clone(), Attempt::Authorized);
        Ok(PairingState::Authorized)
    }

    fn set_attempt(&self, key_id: ClientKeyIdentifier, attempt: Attempt) {
        let now = self.clock.now();
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_stale(&mut attempts, now);
        let full = attempts.len() >= MAX_TRACKED_ATTEMPTS && !attempts.contains_key(&key_id);
        if full && !matches!(attempt, Attempt::Awaiting(_)) {
            // Terminal outcomes were already returned to the caller.
            debug!(%key_id, state = ?attempt.state(), "Attempt table full, outcome not recorded");
            return;
        }
        attempts.insert(
            key_id,
            TrackedAttempt {
                attempt,
                updated_at: now,
            },
        );
    }

    fn has_room_for(&self, key_id: &ClientKeyIdentifier) -> bool {
        let now = self.clock.now();
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_stale(&mut attempts, now);
        attempts.len() < MAX_TRACKED_ATTEMPTS || attempts.contains_key(key_id)
    }

    fn is_stale(&self, tracked: &TrackedAttempt, now: DateTime<Utc>) -> bool {
        now - tracked.updated_at > self.challenge_timeout
    }

    fn evict_stale(
        &self,
        attempts: &mut HashMap<ClientKeyIdentifier, TrackedAttempt>,
        now: DateTime<Utc>,
    ) {
        let before = attempts.len();
        attempts.retain(|_, tracked| !self.is_stale(tracked, now));
        let evicted = before - attempts.len();
        if evicted > 0 {
            debug!(evicted, remaining = attempts.len(), "Evicted stale pairing attempts");
        }
    }
}

/// Client side of phase 2: recovers the secret from a hex challenge.
///
/// Any failure (bad hex, challenge not below `n`) yields `success = false`
/// rather than an error, matching what is sent back on the wire.
pub fn decode_challenge(
    engine: &RsaEngine,
    challenge: &str,
    key: &PrivateKeyMaterial,
) -> ConditionalToken {
    let Some(value) = bigint::from_hex(challenge) else {
        warn!("Pairing challenge is not valid hex");
        return ConditionalToken::failed();
    };

    match engine.sign(&value, key) {
        Ok(secret) => ConditionalToken {
            success: true,
            token: Some(SharedSecret::new(secret).to_hex().to_string()),
        },
        Err(e) => {
            warn!(error = %e, "Pairing challenge could not be decoded");
            ConditionalToken::failed()
        }
    }
}
