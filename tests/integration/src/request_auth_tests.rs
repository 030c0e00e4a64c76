//! Signed-request scenarios after pairing.

use crate::test_utils::*;
use chrono::Duration;
use sigil_core::Config;
use sigil_crypto::{BigUint, RsaEngine};
use sigil_identity::{
    AuthLevel, ClientAuthenticationScope, ClientIdentifier, ClientKeyIdentifier,
    InMemoryPrivateKeyStore, PairingState, RequestToken,
};
use std::sync::Arc;

#[test]
fn test_rsa_1024_sign_then_verify() {
    let engine = RsaEngine::default();
    let mut rng = seeded_rng(201);
    let key = engine.generate_key(1024, &mut rng).unwrap();

    let message = BigUint::from(42u32);
    let signed = engine.sign(&message, &key).unwrap();
    assert_ne!(signed, message);
    assert_eq!(engine.verify(&signed, key.public_key()).unwrap(), message);
}

#[tokio::test]
async fn test_paired_client_requests_are_authorized() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(202);
    let client = alice();

    for scope in [ClientAuthenticationScope::User, ClientAuthenticationScope::Client] {
        let (_, state) = deployment.enroll(&client, scope, &mut rng).await;
        assert_eq!(state, PairingState::Authorized);
    }

    let tokens = deployment
        .authenticator
        .authenticate_request(&client, deployment.now(), &mut rng)
        .await
        .unwrap();
    assert_eq!(tokens.len(), 2);

    let results = deployment
        .verifier
        .verify_request(&client, &tokens, deployment.now() + Duration::seconds(1))
        .await;
    assert_eq!(
        results,
        vec![
            (ClientAuthenticationScope::User, AuthLevel::Authorized),
            (ClientAuthenticationScope::Client, AuthLevel::Authorized),
        ]
    );
}

#[tokio::test]
async fn test_token_past_ttl_is_expired() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(203);
    let client = alice();
    let (info, _) = deployment
        .enroll(&client, ClientAuthenticationScope::Client, &mut rng)
        .await;

    let tokens = deployment
        .authenticator
        .authenticate_request(&client, deployment.now(), &mut rng)
        .await
        .unwrap();
    let token = &tokens[0];

    deployment.clock.advance(Duration::seconds(31));
    let level = deployment
        .verifier
        .verify(&info.key_id, token, deployment.now())
        .await;
    assert_eq!(level, AuthLevel::RequestExpired);
}

#[tokio::test]
async fn test_ttl_follows_config() {
    let config = Config::from_toml_str("[token]\nrequest_ttl_ms = 5000\n").unwrap();
    let deployment = Deployment::new(&config).await;
    let mut rng = seeded_rng(204);
    let client = alice();
    let (info, _) = deployment
        .enroll(&client, ClientAuthenticationScope::User, &mut rng)
        .await;

    let tokens = deployment
        .authenticator
        .authenticate_request(&client, deployment.now(), &mut rng)
        .await
        .unwrap();
    let expires_at = RequestToken::from_security_token(&tokens[0])
        .unwrap()
        .expires_at();
    assert_eq!(expires_at, deployment.now() + Duration::seconds(5));

    let level = deployment
        .verifier
        .verify(&info.key_id, &tokens[0], deployment.now() + Duration::seconds(6))
        .await;
    assert_eq!(level, AuthLevel::RequestExpired);
}

#[tokio::test]
async fn test_tampered_blue_is_unauthorized() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(205);
    let client = alice();
    let (info, _) = deployment
        .enroll(&client, ClientAuthenticationScope::Client, &mut rng)
        .await;

    let tokens = deployment
        .authenticator
        .authenticate_request(&client, deployment.now(), &mut rng)
        .await
        .unwrap();

    let token = RequestToken::from_security_token(&tokens[0]).unwrap();
    for bit in 0..info.private_key.n().bits() {
        let tampered = RequestToken {
            red: token.red.clone(),
            blue: &token.blue ^ (BigUint::from(1u8) << bit),
        }
        .to_security_token(ClientAuthenticationScope::Client);

        let level = deployment
            .verifier
            .verify(&info.key_id, &tampered, deployment.now())
            .await;
        assert_eq!(level, AuthLevel::Unauthorized, "bit {}", bit);
    }

    // Swapping in a different red is caught the same way.
    let swapped = RequestToken {
        red: &token.red ^ BigUint::from(0xFFu8),
        blue: token.blue,
    }
    .to_security_token(ClientAuthenticationScope::Client);
    let level = deployment
        .verifier
        .verify(&info.key_id, &swapped, deployment.now())
        .await;
    assert_eq!(level, AuthLevel::Unauthorized);
}

#[tokio::test]
async fn test_unpaired_identity_is_unknown() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(206);
    let client = alice();
    deployment
        .enroll(&client, ClientAuthenticationScope::Client, &mut rng)
        .await;
    let tokens = deployment
        .authenticator
        .authenticate_request(&client, deployment.now(), &mut rng)
        .await
        .unwrap();

    let stranger = ClientKeyIdentifier::client("c404").unwrap();
    let level = deployment
        .verifier
        .verify(&stranger, &tokens[0], deployment.now())
        .await;
    assert_eq!(level, AuthLevel::Unknown);
}

#[tokio::test]
async fn test_identities_survive_client_restart() {
    let config = Config::default();
    let first = Deployment::new(&config).await;
    let mut rng = seeded_rng(207);
    let client = ClientIdentifier::client("c1", "Laptop");
    let (info, state) = first
        .enroll(&client, ClientAuthenticationScope::Client, &mut rng)
        .await;
    assert_eq!(state, PairingState::Authorized);

    let snapshot = first.client_store.export_json().unwrap();
    let restored = Arc::new(InMemoryPrivateKeyStore::import_json(&snapshot).unwrap());
    let second = Deployment::with_client_store(&config, restored).await;
    assert_eq!(second.authenticator.available_client_ids(), vec!["c1".to_string()]);

    let tokens = second
        .authenticator
        .authenticate_request(&client, first.now(), &mut rng)
        .await
        .unwrap();
    assert_eq!(tokens.len(), 1);

    // The original server still recognizes the restored client.
    let level = first.verifier.verify(&info.key_id, &tokens[0], first.now()).await;
    assert_eq!(level, AuthLevel::Authorized);
}

#[test]
fn test_identifier_equality_ignores_names() {
    let a = ClientIdentifier::new("u1", "Alice", "c1", "Laptop");
    let b = ClientIdentifier::new("u1", "Bob", "c1", "Laptop");
    let c = ClientIdentifier::new("u1", "Alice", "c2", "Laptop");
    assert_eq!(a, b);
    assert_ne!(a, c);
}
