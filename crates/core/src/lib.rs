//! Core functionality shared by the Sigil identity and signing crates.
//!
//! This crate carries the ambient pieces every other crate leans on:
//! configuration, logging initialization, the core error type, and the
//! wall-clock abstraction used for token expiry math.

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::{Config, PairingConfig, RsaConfig, TokenConfig, MIN_SIGNING_KEY_BITS};
pub use error::{CoreError, Result};
pub use time::{Clock, ManualClock, SystemClock};
