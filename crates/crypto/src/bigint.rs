//! Arbitrary-precision helpers shared by the RSA engine and the token codec.
//!
//! Hex text is big-endian digits. Token bytes are little-endian; see
//! [`crate::token`].

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};

/// Odd primes used to discard most composite candidates before Miller-Rabin.
const SMALL_PRIMES: &[u32] = &[
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199,
];

/// Computes `a⁻¹ mod m`, or `None` when `gcd(a, m) != 1`.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    if m.is_zero() {
        return None;
    }

    let modulus = BigInt::from(m.clone());
    let value = BigInt::from(a % m);
    let ext = value.extended_gcd(&modulus);
    if !ext.gcd.is_one() {
        return None;
    }

    // Bezout coefficient may be negative
    ext.x.mod_floor(&modulus).to_biguint()
}

/// Probabilistic primality test: trial division, then `rounds` Miller-Rabin
/// witnesses drawn from `rng`.
pub fn is_probable_prime<R: RngCore + ?Sized>(n: &BigUint, rounds: u32, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    if n == &two {
        return true;
    }
    if n.is_even() {
        return false;
    }

    for &small in SMALL_PRIMES {
        let small = BigUint::from(small);
        if n == &small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
            if x.is_one() {
                return false;
            }
        }
        return false;
    }

    true
}

/// Draws a probable prime of exactly `bits` bits.
///
/// The two top bits are forced so that the product of two such primes has
/// exactly `2 * bits` bits. `cancelled` is polled once per candidate.
pub fn generate_probable_prime<R: RngCore + ?Sized>(
    bits: u32,
    rounds: u32,
    rng: &mut R,
    cancelled: &dyn Fn() -> bool,
) -> CryptoResult<BigUint> {
    if bits < 16 {
        return Err(CryptoError::InvalidKeyLength {
            bits: bits * 2,
            reason: "primes must be at least 16 bits".to_string(),
        });
    }

    let bits = u64::from(bits);
    let mask = (BigUint::one() << (bits - 1)) | (BigUint::one() << (bits - 2)) | BigUint::one();

    loop {
        if cancelled() {
            return Err(CryptoError::Cancelled);
        }
        let candidate = rng.gen_biguint(bits) | &mask;
        if is_probable_prime(&candidate, rounds, rng) {
            return Ok(candidate);
        }
    }
}

/// Encodes as upper-case big-endian hex digits.
pub fn to_hex(value: &BigUint) -> String {
    hex::encode_upper(value.to_bytes_be())
}

/// Decodes case-insensitive big-endian hex digits. Odd digit counts are
/// accepted; empty or non-hex input is not.
pub fn from_hex(text: &str) -> Option<BigUint> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let bytes = if text.len() % 2 == 1 {
        hex::decode(format!("0{}", text)).ok()?
    } else {
        hex::decode(text).ok()?
    };
    Some(BigUint::from_bytes_be(&bytes))
}
