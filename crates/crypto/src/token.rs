//! Bounded random generation and the expiry-carrying "red" request token.
//!
//! A red token is 16 little-endian bytes. Bytes `4..12` hold the expiry as
//! signed milliseconds since the Unix epoch; every other byte is a random
//! non-zero nonce byte.

use chrono::{DateTime, Duration, TimeZone, Utc};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use std::ops::Range;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};

pub const REQUEST_TOKEN_BYTES: usize = 16;

/// Position of the expiry timestamp inside the token bytes.
pub const EXPIRY_WINDOW: Range<usize> = 4..12;

/// Largest allowed distance between the bound's bit length and the
/// requested draw length.
pub const MAX_BIT_LENGTH_SKEW: u64 = 16;

/// Draws before [`generate_bounded_random`] gives up.
pub const MAX_REJECTION_ROUNDS: u32 = 10_000;

/// Rejection-samples `max(1, bit_length / 8)` random non-zero bytes
/// (little-endian) until the value is below `max_value`.
pub fn generate_bounded_random<R: RngCore + CryptoRng + ?Sized>(
    max_value: &BigUint,
    bit_length: u32,
    rng: &mut R,
) -> CryptoResult<BigUint> {
    let intractable = || CryptoError::IntractableGeneration {
        max_bits: max_value.bits(),
        bit_length,
    };

    if max_value.bits().abs_diff(u64::from(bit_length)) > MAX_BIT_LENGTH_SKEW {
        return Err(intractable());
    }

    let mut buffer = vec![0u8; (bit_length as usize / 8).max(1)];
    for _ in 0..MAX_REJECTION_ROUNDS {
        fill_non_zero(&mut buffer, rng);
        let candidate = BigUint::from_bytes_le(&buffer);
        if &candidate < max_value {
            buffer.zeroize();
            return Ok(candidate);
        }
    }

    buffer.zeroize();
    Err(intractable())
}

/// Builds a red token expiring at `now + ttl`.
pub fn generate_request_expire_token<R: RngCore + CryptoRng + ?Sized>(
    ttl: Duration,
    now: DateTime<Utc>,
    rng: &mut R,
) -> BigUint {
    let expires_at = now
        .timestamp_millis()
        .saturating_add(ttl.num_milliseconds());

    let mut buffer = [0u8; REQUEST_TOKEN_BYTES];
    fill_non_zero(&mut buffer, rng);
    buffer[EXPIRY_WINDOW].copy_from_slice(&expires_at.to_le_bytes());
    BigUint::from_bytes_le(&buffer)
}

/// Reads the expiry back out of a red token. Bytes missing from a short
/// token read as zero; an unrepresentable instant clamps to the epoch.
pub fn parse_request_expire_time(red: &BigUint) -> DateTime<Utc> {
    let bytes = red.to_bytes_le();
    let mut window = [0u8; 8];
    for (offset, slot) in window.iter_mut().enumerate() {
        if let Some(byte) = bytes.get(EXPIRY_WINDOW.start + offset) {
            *slot = *byte;
        }
    }

    let millis = i64::from_le_bytes(window);
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(unix_epoch)
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

fn fill_non_zero<R: RngCore + ?Sized>(buffer: &mut [u8], rng: &mut R) {
    rng.fill_bytes(buffer);
    for byte in buffer.iter_mut() {
        while *byte == 0 {
            *byte = rng.next_u32() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_123_456).unwrap()
    }

    #[test]
    fn test_expiry_round_trip() {
        let mut rng = StdRng::seed_from_u64(10);
        for ttl in [
            Duration::seconds(30),
            Duration::milliseconds(1),
            Duration::seconds(-1),
            Duration::days(365),
        ] {
            let red = generate_request_expire_token(ttl, t0(), &mut rng);
            assert_eq!(parse_request_expire_time(&red), t0() + ttl);
        }
    }

    #[test]
    fn test_token_layout() {
        let mut rng = StdRng::seed_from_u64(11);
        let red = generate_request_expire_token(Duration::seconds(30), t0(), &mut rng);
        let bytes = red.to_bytes_le();

        assert_eq!(bytes.len(), REQUEST_TOKEN_BYTES);
        for (i, byte) in bytes.iter().enumerate() {
            if !EXPIRY_WINDOW.contains(&i) {
                assert_ne!(*byte, 0, "nonce byte {} is zero", i);
            }
        }
        let expected = (t0().timestamp_millis() + 30_000).to_le_bytes();
        assert_eq!(&bytes[EXPIRY_WINDOW], &expected);
    }

    #[test]
    fn test_tokens_carry_fresh_nonces() {
        let mut rng = StdRng::seed_from_u64(12);
        let a = generate_request_expire_token(Duration::seconds(30), t0(), &mut rng);
        let b = generate_request_expire_token(Duration::seconds(30), t0(), &mut rng);
        assert_ne!(a, b);
        assert_eq!(parse_request_expire_time(&a), parse_request_expire_time(&b));
    }

    #[test]
    fn test_overflow_clamps_to_epoch() {
        let mut bytes = [0x11u8; REQUEST_TOKEN_BYTES];
        bytes[EXPIRY_WINDOW].copy_from_slice(&i64::MAX.to_le_bytes());
        let red = BigUint::from_bytes_le(&bytes);
        assert_eq!(parse_request_expire_time(&red), unix_epoch());
    }

    #[test]
    fn test_short_token_reads_zero_padded() {
        assert_eq!(parse_request_expire_time(&BigUint::from(0u32)), unix_epoch());
        assert_eq!(parse_request_expire_time(&BigUint::from(u32::MAX)), unix_epoch());
    }

    #[test]
    fn test_bounded_random_below_max() {
        let mut rng = StdRng::seed_from_u64(13);
        let max = (BigUint::from(1u32) << 255u32) + BigUint::from(12_345u32);
        for _ in 0..50 {
            let value = generate_bounded_random(&max, 256, &mut rng).unwrap();
            assert!(value < max);
            assert!(value.to_bytes_le().iter().all(|b| *b != 0));
        }
    }

    #[test]
    fn test_bounded_random_tiny_length() {
        let mut rng = StdRng::seed_from_u64(14);
        let max = BigUint::from(200u32);
        let value = generate_bounded_random(&max, 4, &mut rng).unwrap();
        assert!(value < max);
        assert!(value > BigUint::from(0u32));
    }

    #[test]
    fn test_intractable_generation() {
        let mut rng = StdRng::seed_from_u64(15);
        let max = BigUint::from(1u32) << 1024u32;
        assert!(matches!(
            generate_bounded_random(&max, 512, &mut rng),
            Err(CryptoError::IntractableGeneration { .. })
        ));
        let small = BigUint::from(1u32) << 100u32;
        assert!(matches!(
            generate_bounded_random(&small, 116, &mut rng),
            Err(CryptoError::IntractableGeneration { .. })
        ));
    }
}
