//! RSA key material and its file/embedded-string formats.
//!
//! ```text
//! <rsa_public_key E="hex" N="hex" Length="nnn"/>
//! <rsa_private_key D="hex" E="hex" N="hex" P="hex" Q="hex" DP="hex" DQ="hex" IQ="hex" Length="nnn"/>
//! ```
//!
//! Attribute names are part of the stored format and must not change.
//! Parsing returns `None` for anything malformed or internally inconsistent;
//! it never yields a partially valid key.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

use crate::bigint::{from_hex, to_hex};
use crate::error::{CryptoError, CryptoResult};
use crate::xml::{parse_element, write_element};

pub const PUBLIC_KEY_ELEMENT: &str = "rsa_public_key";
pub const PRIVATE_KEY_ELEMENT: &str = "rsa_private_key";

/// How far below the declared length the modulus may fall.
const LENGTH_SLACK_BITS: u64 = 8;

/// Public half of an RSA key. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKeyMaterial {
    e: BigUint,
    n: BigUint,
    key_length_bits: u32,
}

impl PublicKeyMaterial {
    pub fn new(e: BigUint, n: BigUint, key_length_bits: u32) -> CryptoResult<Self> {
        if e.is_zero() || n.is_zero() {
            return Err(CryptoError::InvalidKeyMaterial(
                "exponent and modulus must be positive".to_string(),
            ));
        }

        let n_bits = n.bits();
        let declared = u64::from(key_length_bits);
        if n_bits > declared || n_bits + LENGTH_SLACK_BITS < declared {
            return Err(CryptoError::InvalidKeyMaterial(format!(
                "{}-bit modulus does not match declared length {}",
                n_bits, key_length_bits
            )));
        }

        Ok(Self {
            e,
            n,
            key_length_bits,
        })
    }

    pub fn e(&self) -> &BigUint {
        &self.e
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn key_length_bits(&self) -> u32 {
        self.key_length_bits
    }

    pub fn to_xml(&self) -> String {
        let e = to_hex(&self.e);
        let n = to_hex(&self.n);
        let length = self.key_length_bits.to_string();
        write_element(
            PUBLIC_KEY_ELEMENT,
            &[("E", e.as_str()), ("N", n.as_str()), ("Length", length.as_str())],
        )
    }

    pub fn from_xml(text: &str) -> Option<Self> {
        let element = parse_element(text)?;
        if element.name != PUBLIC_KEY_ELEMENT {
            return None;
        }

        let e = from_hex(element.attribute("E")?)?;
        let n = from_hex(element.attribute("N")?)?;
        let length = element.attribute("Length")?.trim().parse::<u32>().ok()?;
        Self::new(e, n, length).ok()
    }
}

/// Precomputed values for the CRT private-key operation.
#[derive(Clone, PartialEq, Eq)]
pub struct CrtParameters {
    pub p: BigUint,
    pub q: BigUint,
    /// `d mod (p - 1)`
    pub dp: BigUint,
    /// `d mod (q - 1)`
    pub dq: BigUint,
    /// `q⁻¹ mod p`
    pub inv_q: BigUint,
}

impl fmt::Debug for CrtParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrtParameters").finish_non_exhaustive()
    }
}

/// Full RSA key. Created once by key generation or loaded from a store.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKeyMaterial {
    public: PublicKeyMaterial,
    d: BigUint,
    crt: Option<CrtParameters>,
}

impl PrivateKeyMaterial {
    /// Builds a key after checking the RSA invariants that can be checked
    /// from the supplied components.
    pub fn new(
        public: PublicKeyMaterial,
        d: BigUint,
        crt: Option<CrtParameters>,
    ) -> CryptoResult<Self> {
        let key = Self { public, d, crt };
        key.validate()?;
        Ok(key)
    }

    pub fn public_key(&self) -> &PublicKeyMaterial {
        &self.public
    }

    pub fn e(&self) -> &BigUint {
        &self.public.e
    }

    pub fn n(&self) -> &BigUint {
        &self.public.n
    }

    pub fn d(&self) -> &BigUint {
        &self.d
    }

    pub fn crt(&self) -> Option<&CrtParameters> {
        self.crt.as_ref()
    }

    pub fn key_length_bits(&self) -> u32 {
        self.public.key_length_bits
    }

    /// Checks `d < n` and, with CRT parameters, `n = p·q`,
    /// `d·e ≡ 1 (mod (p-1)(q-1))`, `dp`, `dq` and `inv_q`.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.d.is_zero() || self.d >= self.public.n {
            return Err(CryptoError::InvalidKeyMaterial(
                "private exponent out of range".to_string(),
            ));
        }

        let Some(crt) = &self.crt else {
            return Ok(());
        };

        let one = BigUint::one();
        if crt.p <= one || crt.q <= one || &crt.p * &crt.q != self.public.n {
            return Err(CryptoError::InvalidKeyMaterial("n != p * q".to_string()));
        }

        let p1 = &crt.p - 1u32;
        let q1 = &crt.q - 1u32;
        let phi = &p1 * &q1;
        if (&self.d * &self.public.e).mod_floor(&phi) != one {
            return Err(CryptoError::InvalidKeyMaterial(
                "d is not the inverse of e".to_string(),
            ));
        }
        if crt.dp != &self.d % &p1 || crt.dq != &self.d % &q1 {
            return Err(CryptoError::InvalidKeyMaterial(
                "CRT exponents do not match d".to_string(),
            ));
        }
        if (&crt.inv_q * &crt.q) % &crt.p != one {
            return Err(CryptoError::InvalidKeyMaterial(
                "inv_q is not the inverse of q mod p".to_string(),
            ));
        }

        Ok(())
    }

    pub fn to_xml(&self) -> Zeroizing<String> {
        let d = Zeroizing::new(to_hex(&self.d));
        let e = to_hex(&self.public.e);
        let n = to_hex(&self.public.n);
        let length = self.public.key_length_bits.to_string();

        let mut attributes: Vec<(&str, &str)> =
            vec![("D", d.as_str()), ("E", e.as_str()), ("N", n.as_str())];

        let crt_hex = self.crt.as_ref().map(|crt| {
            [
                Zeroizing::new(to_hex(&crt.p)),
                Zeroizing::new(to_hex(&crt.q)),
                Zeroizing::new(to_hex(&crt.dp)),
                Zeroizing::new(to_hex(&crt.dq)),
                Zeroizing::new(to_hex(&crt.inv_q)),
            ]
        });
        if let Some([p, q, dp, dq, iq]) = &crt_hex {
            attributes.extend_from_slice(&[
                ("P", p.as_str()),
                ("Q", q.as_str()),
                ("DP", dp.as_str()),
                ("DQ", dq.as_str()),
                ("IQ", iq.as_str()),
            ]);
        }
        attributes.push(("Length", length.as_str()));

        Zeroizing::new(write_element(PRIVATE_KEY_ELEMENT, &attributes))
    }

    pub fn from_xml(text: &str) -> Option<Self> {
        let element = parse_element(text)?;
        if element.name != PRIVATE_KEY_ELEMENT {
            return None;
        }

        let e = from_hex(element.attribute("E")?)?;
        let n = from_hex(element.attribute("N")?)?;
        let d = from_hex(element.attribute("D")?)?;
        let length = element.attribute("Length")?.trim().parse::<u32>().ok()?;
        let public = PublicKeyMaterial::new(e, n, length).ok()?;

        let crt_names = ["P", "Q", "DP", "DQ", "IQ"];
        let present: Vec<&str> = crt_names
            .iter()
            .filter_map(|name| element.attribute(name))
            .collect();

        let crt = match present.len() {
            0 => None,
            5 => Some(CrtParameters {
                p: from_hex(present[0])?,
                q: from_hex(present[1])?,
                dp: from_hex(present[2])?,
                dq: from_hex(present[3])?,
                inv_q: from_hex(present[4])?,
            }),
            _ => return None,
        };

        Self::new(public, d, crt).ok()
    }
}

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyMaterial")
            .field("key_length_bits", &self.public.key_length_bits)
            .field("crt", &self.crt.is_some())
            .finish_non_exhaustive()
    }
}

impl Serialize for PublicKeyMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_xml())
    }
}

impl<'de> Deserialize<'de> for PublicKeyMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PublicKeyMaterial::from_xml(&text)
            .ok_or_else(|| D::Error::custom("invalid rsa_public_key element"))
    }
}

impl Serialize for PrivateKeyMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_xml())
    }
}

impl<'de> Deserialize<'de> for PrivateKeyMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Zeroizing::new(String::deserialize(deserializer)?);
        PrivateKeyMaterial::from_xml(&text)
            .ok_or_else(|| D::Error::custom("invalid rsa_private_key element"))
    }
}
