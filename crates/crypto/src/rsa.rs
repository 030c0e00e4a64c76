//! Raw (textbook) RSA engine: key generation plus the private-key ("sign")
//! and public-key ("verify") primitives.
//!
//! There is no padding here. `verify(sign(m)) == m` and `sign(verify(m)) == m`
//! for every `m < n`; the request-token and pairing protocols build on that
//! symmetry directly.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::One;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sigil_core::RsaConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bigint::{generate_probable_prime, mod_inverse};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{CrtParameters, PrivateKeyMaterial, PublicKeyMaterial};

/// Fixed public exponent (F4).
pub const PUBLIC_EXPONENT: u32 = 65_537;

/// Smallest modulus the engine will generate.
pub const MIN_KEY_BITS: u32 = 32;

/// RSA engine. Holds only tuning parameters, so one instance can be shared
/// across threads; randomness is always supplied by the caller.
#[derive(Debug, Clone)]
pub struct RsaEngine {
    primality_rounds: u32,
    max_attempts: u32,
}

impl Default for RsaEngine {
    fn default() -> Self {
        Self::new(&RsaConfig::default())
    }
}

impl RsaEngine {
    pub fn new(config: &RsaConfig) -> Self {
        Self::with_limits(config.primality_rounds, config.max_keygen_attempts)
    }

    pub fn with_limits(primality_rounds: u32, max_attempts: u32) -> Self {
        Self {
            primality_rounds: primality_rounds.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn primality_rounds(&self) -> u32 {
        self.primality_rounds
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Generates a key with a modulus of exactly `bits` bits.
    pub fn generate_key<R: RngCore + CryptoRng + ?Sized>(
        &self,
        bits: u32,
        rng: &mut R,
    ) -> CryptoResult<PrivateKeyMaterial> {
        self.generate_key_with_cancel(bits, rng, &|| false)
    }

    /// Like [`generate_key`](Self::generate_key), polling `cancelled` between
    /// prime candidates.
    pub fn generate_key_with_cancel<R: RngCore + CryptoRng + ?Sized>(
        &self,
        bits: u32,
        rng: &mut R,
        cancelled: &dyn Fn() -> bool,
    ) -> CryptoResult<PrivateKeyMaterial> {
        if bits < MIN_KEY_BITS || bits % 2 != 0 {
            return Err(CryptoError::InvalidKeyLength {
                bits,
                reason: format!("must be even and at least {}", MIN_KEY_BITS),
            });
        }

        let e = BigUint::from(PUBLIC_EXPONENT);
        for attempt in 1..=self.max_attempts {
            let p = generate_probable_prime(bits / 2, self.primality_rounds, rng, cancelled)?;
            let q = generate_probable_prime(bits / 2, self.primality_rounds, rng, cancelled)?;
            if p == q {
                debug!(attempt, "Drew identical primes, resampling");
                continue;
            }

            match derive_private_key(&e, p, q, bits) {
                Some(key) => {
                    debug!(bits, attempt, "Generated RSA key");
                    return Ok(key);
                }
                None => debug!(attempt, "Prime pair unusable for e, resampling"),
            }
        }

        warn!(
            bits,
            attempts = self.max_attempts,
            "RSA key generation gave up"
        );
        Err(CryptoError::KeyGenerationExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Runs key generation on the blocking pool with OS randomness.
    /// Cancelling `cancel` stops the search at the next prime candidate.
    pub async fn generate_key_async(
        &self,
        bits: u32,
        cancel: CancellationToken,
    ) -> CryptoResult<PrivateKeyMaterial> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut rng = OsRng;
            engine.generate_key_with_cancel(bits, &mut rng, &|| cancel.is_cancelled())
        })
        .await
        .map_err(|e| CryptoError::TaskFailed(e.to_string()))?
    }

    /// Private-key operation, `m^d mod n`, CRT-accelerated when the key
    /// carries CRT parameters.
    pub fn sign(&self, m: &BigUint, key: &PrivateKeyMaterial) -> CryptoResult<BigUint> {
        check_range(m, key.n())?;

        let Some(crt) = key.crt() else {
            return Ok(m.modpow(key.d(), key.n()));
        };

        let m1 = m.modpow(&crt.dp, &crt.p);
        let m2 = m.modpow(&crt.dq, &crt.q);
        let m2_mod_p = &m2 % &crt.p;
        let diff = if m1 >= m2_mod_p {
            m1 - m2_mod_p
        } else {
            m1 + &crt.p - m2_mod_p
        };
        let h = (&crt.inv_q * diff) % &crt.p;
        Ok(m2 + h * &crt.q)
    }

    /// Public-key operation, `m^e mod n`.
    pub fn verify(&self, m: &BigUint, key: &PublicKeyMaterial) -> CryptoResult<BigUint> {
        check_range(m, key.n())?;
        Ok(m.modpow(key.e(), key.n()))
    }
}

fn check_range(m: &BigUint, n: &BigUint) -> CryptoResult<()> {
    if m >= n {
        return Err(CryptoError::MessageOutOfRange {
            message_bits: m.bits(),
            modulus_bits: n.bits(),
        });
    }
    Ok(())
}

/// Completes a key from two primes, or `None` when `e` is not invertible
/// modulo φ or `q` has no inverse modulo `p`.
fn derive_private_key(
    e: &BigUint,
    p: BigUint,
    q: BigUint,
    bits: u32,
) -> Option<PrivateKeyMaterial> {
    let p1 = &p - 1u32;
    let q1 = &q - 1u32;
    let phi = &p1 * &q1;
    if !e.gcd(&phi).is_one() {
        return None;
    }

    let d = mod_inverse(e, &phi)?;
    let inv_q = mod_inverse(&q, &p)?;
    let dp = &d % &p1;
    let dq = &d % &q1;
    let n = &p * &q;

    let public = PublicKeyMaterial::new(e.clone(), n, bits).ok()?;
    PrivateKeyMaterial::new(
        public,
        d,
        Some(CrtParameters {
            p,
            q,
            dp,
            dq,
            inv_q,
        }),
    )
    .ok()
}
