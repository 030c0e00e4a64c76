//! Client identity, pairing and request authentication for Sigil.
//!
//! # Core Concepts
//!
//! - **Identity**: a user id, a client id, or both, bound to one RSA key pair
//!   through a [`ClientAuthenticationScope`]
//! - **Pairing**: a one-time challenge that proves possession of the private
//!   key and leaves both sides holding a shared secret
//! - **Request tokens**: per-request red/blue pairs signed over the shared
//!   secret, carrying their own expiry
//!
//! The server side lives in [`PairingServer`] and [`RequestVerifier`]; the
//! client side in [`ClientAuthenticator`]. Both reach persistent state only
//! through the [`PublicKeyStore`] and [`PrivateKeyStore`] traits.

pub mod authenticator;
pub mod client;
pub mod error;
pub mod pairing;
pub mod request;
pub mod secret;
pub mod store;

pub use authenticator::ClientAuthenticator;
pub use client::{AuthLevel, ClientAuthenticationScope, ClientIdentifier, ClientKeyIdentifier};
pub use error::{IdentityError, IdentityResult};
pub use pairing::{
    decode_challenge, AuthStep1Result, ConditionalToken, PairingServer, PairingState,
    MAX_TRACKED_ATTEMPTS, SECRET_BIT_MARGIN,
};
pub use request::{verify_request_token, RequestSigner, RequestToken, RequestVerifier, SecurityToken};
pub use secret::SharedSecret;
pub use store::{
    ClientSecretInfo, InMemoryPrivateKeyStore, InMemoryPublicKeyStore, PrivateKeyStore,
    PublicKeyStore, ServerAuthState,
};
