//! Shared secret negotiated during pairing.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sigil_crypto::{bigint, BigUint};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Pairing secret `S`. Serialized as an uppercase hex string; never printed.
#[derive(Clone)]
pub struct SharedSecret(BigUint);

impl SharedSecret {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(bigint::to_hex(&self.0))
    }

    pub fn from_hex(text: &str) -> Option<Self> {
        bigint::from_hex(text).map(Self)
    }

    /// Constant-time comparison against a decoded candidate value.
    pub fn matches(&self, candidate: &BigUint) -> bool {
        ct_eq_biguint(&self.0, candidate)
    }
}

/// Compares two integers without an early exit on the first differing byte.
pub(crate) fn ct_eq_biguint(a: &BigUint, b: &BigUint) -> bool {
    let a = Zeroizing::new(a.to_bytes_le());
    let b = Zeroizing::new(b.to_bytes_le());
    let width = a.len().max(b.len());

    let mut left = Zeroizing::new(vec![0u8; width]);
    let mut right = Zeroizing::new(vec![0u8; width]);
    left[..a.len()].copy_from_slice(&a);
    right[..b.len()].copy_from_slice(&b);

    left.ct_eq(&right[..]).into()
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for SharedSecret {}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

impl Serialize for SharedSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SharedSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Zeroizing::new(String::deserialize(deserializer)?);
        Self::from_hex(&text).ok_or_else(|| de::Error::custom("invalid shared secret hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_value() {
        let secret = SharedSecret::new(BigUint::from(0xDEAD_BEEFu32));
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("DEADBEEF"));
        assert!(!printed.to_lowercase().contains("deadbeef"));
    }

    #[test]
    fn test_serde_as_hex() {
        let secret = SharedSecret::new(BigUint::from(0xABCu32));
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"0ABC\"");

        let back: SharedSecret = serde_json::from_str(&json).unwrap();
        assert_eq!(back, secret);

        assert!(serde_json::from_str::<SharedSecret>("\"xyz\"").is_err());
    }

    #[test]
    fn test_constant_time_compare_handles_width() {
        let small = BigUint::from(5u32);
        let wide = BigUint::from(5u32 + (1 << 24));
        assert!(ct_eq_biguint(&small, &BigUint::from(5u8)));
        assert!(!ct_eq_biguint(&small, &wide));
        assert!(!ct_eq_biguint(&wide, &small));
        assert!(ct_eq_biguint(&BigUint::from(0u8), &BigUint::default()));
    }
}
