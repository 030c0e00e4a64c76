//! Pairing handshake scenarios across client and server.

use crate::test_utils::*;
use chrono::Duration;
use sigil_core::{Config, PairingConfig};
use sigil_crypto::KeyThumbprint;
use sigil_identity::{
    AuthLevel, ClientAuthenticationScope, ClientIdentifier, ClientKeyIdentifier,
    ConditionalToken, IdentityError, PairingState, PrivateKeyStore, PublicKeyStore,
};

#[tokio::test]
async fn test_pairing_stores_trusted_key_on_both_sides() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(101);
    let client = alice();

    let (info, state) = deployment
        .enroll(&client, ClientAuthenticationScope::User, &mut rng)
        .await;
    assert_eq!(state, PairingState::Authorized);

    let record = deployment
        .server_store
        .get_client_state(&info.key_id)
        .await
        .unwrap()
        .expect("server record");
    assert!(record.trusted);
    assert_eq!(
        KeyThumbprint::from_public_key(&record.public_key),
        KeyThumbprint::from_private_key(&info.private_key)
    );
    // Only the ids the scope binds are kept.
    assert_eq!(record.client_info.client_id, None);
    assert_eq!(record.client_info.user_name.as_deref(), Some("Alice"));

    let client_side = deployment
        .client_store
        .load_identity(&info.key_id)
        .await
        .unwrap()
        .expect("client record");
    assert_eq!(client_side.secret, record.secret);
}

#[tokio::test]
async fn test_repairing_known_key_skips_challenge() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(102);
    let client = alice();

    let (info, _) = deployment
        .enroll(&client, ClientAuthenticationScope::Client, &mut rng)
        .await;

    let step1 = deployment
        .pairing
        .begin(
            &client,
            ClientAuthenticationScope::Client,
            info.private_key.public_key(),
            &mut rng,
        )
        .await
        .unwrap();
    assert!(step1.first_turn_success);
    assert!(!step1.second_turn_required);
    assert_eq!(step1.response_token, None);
}

#[tokio::test]
async fn test_independent_scopes_pair_separately() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(103);
    let client = alice();

    for scope in [
        ClientAuthenticationScope::User,
        ClientAuthenticationScope::Client,
        ClientAuthenticationScope::UserClient,
    ] {
        let (_, state) = deployment.enroll(&client, scope, &mut rng).await;
        assert_eq!(state, PairingState::Authorized, "scope {}", scope);
    }
    assert_eq!(deployment.server_store.len(), 3);
}

#[tokio::test]
async fn test_slow_client_is_rejected() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(104);
    let client = ClientIdentifier::client("kiosk-3", "Kiosk");
    let info = deployment
        .authenticator
        .generate_identity(&client, ClientAuthenticationScope::Client, TEST_KEY_BITS, &mut rng)
        .await
        .unwrap();

    let step1 = deployment
        .pairing
        .begin(
            &client,
            ClientAuthenticationScope::Client,
            info.private_key.public_key(),
            &mut rng,
        )
        .await
        .unwrap();
    let answer = deployment
        .authenticator
        .answer_challenge(&info.key_id, step1.response_token.as_deref().unwrap())
        .await
        .unwrap();

    deployment.clock.advance(Duration::seconds(31));
    let state = deployment.pairing.complete(&info.key_id, &answer).await.unwrap();
    assert_eq!(state, PairingState::Rejected);
    assert!(deployment.server_store.is_empty());
    let client_side = deployment
        .client_store
        .load_identity(&info.key_id)
        .await
        .unwrap()
        .unwrap();
    assert!(client_side.secret.is_none());

    // A fresh attempt succeeds.
    assert_eq!(
        deployment.pair(&client, &info, &mut rng).await,
        PairingState::Authorized
    );
}

#[tokio::test]
async fn test_forged_answer_is_rejected() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(105);
    let client = ClientIdentifier::client("c7", "Tablet");
    let info = deployment
        .authenticator
        .generate_identity(&client, ClientAuthenticationScope::Client, TEST_KEY_BITS, &mut rng)
        .await
        .unwrap();

    deployment
        .pairing
        .begin(
            &client,
            ClientAuthenticationScope::Client,
            info.private_key.public_key(),
            &mut rng,
        )
        .await
        .unwrap();

    let forged = ConditionalToken {
        success: true,
        token: Some("01".into()),
    };
    let state = deployment.pairing.complete(&info.key_id, &forged).await.unwrap();
    assert_eq!(state, PairingState::Rejected);

    let err = deployment
        .pairing
        .complete(&info.key_id, &forged)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_pairing_policy_from_config() {
    let config = Config {
        pairing: PairingConfig {
            allowed_scopes: vec!["client".into()],
            ..PairingConfig::default()
        },
        ..Config::default()
    };
    let deployment = Deployment::new(&config).await;
    let mut rng = seeded_rng(106);
    let client = alice();

    let (_, state) = deployment
        .enroll(&client, ClientAuthenticationScope::User, &mut rng)
        .await;
    assert_eq!(state, PairingState::Rejected);

    let key_id = ClientKeyIdentifier::user("u1").unwrap();
    assert_eq!(deployment.pairing.state(&key_id), PairingState::Rejected);

    let (_, state) = deployment
        .enroll(&client, ClientAuthenticationScope::Client, &mut rng)
        .await;
    assert_eq!(state, PairingState::Authorized);
}

#[tokio::test]
async fn test_rejected_repair_keeps_working_secret() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(107);
    let client = ClientIdentifier::client("c1", "Laptop");
    let (info, state) = deployment
        .enroll(&client, ClientAuthenticationScope::Client, &mut rng)
        .await;
    assert_eq!(state, PairingState::Authorized);
    let before = deployment
        .client_store
        .load_identity(&info.key_id)
        .await
        .unwrap()
        .unwrap()
        .secret;

    // Mark the record untrusted so the next attempt issues a challenge.
    let mut record = deployment
        .server_store
        .get_client_state(&info.key_id)
        .await
        .unwrap()
        .unwrap();
    record.trusted = false;
    deployment.server_store.update_client_state(record.clone()).await.unwrap();

    let step1 = deployment
        .pairing
        .begin(
            &client,
            ClientAuthenticationScope::Client,
            info.private_key.public_key(),
            &mut rng,
        )
        .await
        .unwrap();
    let answer = deployment
        .authenticator
        .answer_challenge(&info.key_id, step1.response_token.as_deref().unwrap())
        .await
        .unwrap();
    assert!(answer.success);

    deployment.clock.advance(Duration::seconds(31));
    let state = deployment.pairing.complete(&info.key_id, &answer).await.unwrap();
    assert_eq!(state, PairingState::Rejected);

    let after = deployment
        .client_store
        .load_identity(&info.key_id)
        .await
        .unwrap()
        .unwrap()
        .secret;
    assert_eq!(after, before);

    // With the old record restored, requests still verify against it.
    record.trusted = true;
    deployment.server_store.update_client_state(record).await.unwrap();
    let tokens = deployment
        .authenticator
        .authenticate_request(&client, deployment.now(), &mut rng)
        .await
        .unwrap();
    let level = deployment
        .verifier
        .verify(&info.key_id, &tokens[0], deployment.now())
        .await;
    assert_eq!(level, AuthLevel::Authorized);
}

#[tokio::test]
async fn test_trusted_identity_cannot_be_taken_over() {
    let deployment = Deployment::new(&Config::default()).await;
    let mut rng = seeded_rng(108);
    let client = alice();
    let (info, _) = deployment
        .enroll(&client, ClientAuthenticationScope::User, &mut rng)
        .await;

    let intruder = deployment.engine.generate_key(TEST_KEY_BITS, &mut rng).unwrap();
    let step1 = deployment
        .pairing
        .begin(
            &client,
            ClientAuthenticationScope::User,
            intruder.public_key(),
            &mut rng,
        )
        .await
        .unwrap();
    assert!(!step1.first_turn_success);
    assert_eq!(step1.response_token, None);

    let record = deployment
        .server_store
        .get_client_state(&info.key_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.public_key, *info.private_key.public_key());
}
