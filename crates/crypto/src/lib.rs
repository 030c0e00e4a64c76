//! Asymmetric primitives for the Sigil request-signing stack.
//!
//! This crate provides the arithmetic foundation that identity and request
//! signing are built on:
//!
//! - **RSA engine**: key generation with bounded retries, raw private-key
//!   ("sign") and public-key ("verify") operations, CRT acceleration
//! - **Key material**: public/private key types and their XML file format
//! - **Thumbprints**: compact 64-bit key identities for lookup
//! - **Token codec**: bounded random generation and expiry-carrying tokens
//!
//! # Security Principles
//!
//! - Randomness is always passed in explicitly; there are no global RNGs
//! - Secret key components are never logged or printed by `Debug`
//! - Malformed key text parses to `None`, never to a partial key
//! - Arithmetic preconditions (`m < n`) are errors, never silent truncation

pub mod bigint;
pub mod error;
pub mod keys;
pub mod rsa;
pub mod thumbprint;
pub mod token;

mod xml;

pub use num_bigint::BigUint;

pub use error::{CryptoError, CryptoResult};
pub use keys::{CrtParameters, PrivateKeyMaterial, PublicKeyMaterial};
pub use rsa::{RsaEngine, MIN_KEY_BITS, PUBLIC_EXPONENT};
pub use thumbprint::KeyThumbprint;
pub use token::{
    generate_bounded_random, generate_request_expire_token, parse_request_expire_time,
};
