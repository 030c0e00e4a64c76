//! End-to-end tests: pairing a client with a server and authenticating
//! signed requests across the crate boundaries.

pub mod test_utils;

#[cfg(test)]
mod pairing_flow_tests;

#[cfg(test)]
mod request_auth_tests;
