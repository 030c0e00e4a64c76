//! Shared fixtures: one server and one client wired over in-memory stores.

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sigil_core::{Clock, Config, ManualClock};
use sigil_crypto::RsaEngine;
use sigil_identity::{
    ClientAuthenticationScope, ClientAuthenticator, ClientIdentifier, ClientSecretInfo,
    InMemoryPrivateKeyStore, InMemoryPublicKeyStore, PairingServer, PairingState,
    RequestVerifier,
};
use std::sync::Arc;

/// Key size used by most scenarios; large enough for real secrets, small
/// enough for debug-build key generation.
pub const TEST_KEY_BITS: u32 = 512;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn init_tracing() {
    let _ = sigil_core::logging::try_init();
}

pub fn alice() -> ClientIdentifier {
    ClientIdentifier::new("u1", "Alice", "c1", "Laptop")
}

/// A pairing server, request verifier and client authenticator sharing one
/// manual clock.
pub struct Deployment {
    pub engine: RsaEngine,
    pub clock: Arc<ManualClock>,
    pub server_store: Arc<InMemoryPublicKeyStore>,
    pub client_store: Arc<InMemoryPrivateKeyStore>,
    pub pairing: PairingServer,
    pub verifier: RequestVerifier,
    pub authenticator: ClientAuthenticator,
}

impl Deployment {
    pub async fn new(config: &Config) -> Self {
        Self::with_client_store(config, Arc::new(InMemoryPrivateKeyStore::new())).await
    }

    pub async fn with_client_store(config: &Config, client_store: Arc<InMemoryPrivateKeyStore>) -> Self {
        init_tracing();
        let engine = RsaEngine::new(&config.rsa);
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let server_store = Arc::new(InMemoryPublicKeyStore::new());

        let pairing = PairingServer::new(
            engine.clone(),
            server_store.clone(),
            clock.clone(),
            &config.pairing,
        )
        .expect("pairing config is valid");
        let verifier = RequestVerifier::new(engine.clone(), server_store.clone());
        let authenticator =
            ClientAuthenticator::new(engine.clone(), client_store.clone(), &config.token)
                .await
                .expect("client store loads");

        Self {
            engine,
            clock,
            server_store,
            client_store,
            pairing,
            verifier,
            authenticator,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Creates a client identity and runs both pairing phases for it.
    pub async fn enroll(
        &self,
        client: &ClientIdentifier,
        scope: ClientAuthenticationScope,
        rng: &mut StdRng,
    ) -> (ClientSecretInfo, PairingState) {
        let info = self
            .authenticator
            .generate_identity(client, scope, TEST_KEY_BITS, rng)
            .await
            .expect("identity generation");
        let state = self.pair(client, &info, rng).await;
        (info, state)
    }

    /// Runs the handshake for an identity the client already holds.
    pub async fn pair(
        &self,
        client: &ClientIdentifier,
        info: &ClientSecretInfo,
        rng: &mut StdRng,
    ) -> PairingState {
        let step1 = self
            .pairing
            .begin(client, info.key_id.scope(), info.private_key.public_key(), rng)
            .await
            .expect("phase 1");

        if !step1.first_turn_success {
            return PairingState::Rejected;
        }
        let Some(challenge) = step1.response_token else {
            return PairingState::Authorized;
        };

        let answer = self
            .authenticator
            .answer_challenge(&info.key_id, &challenge)
            .await
            .expect("challenge answer");
        let state = self
            .pairing
            .complete(&info.key_id, &answer)
            .await
            .expect("phase 2");

        // The client keeps the secret only once the server has stored it.
        if state == PairingState::Authorized {
            let secret = answer.secret().expect("accepted answer carries a secret");
            self.authenticator
                .complete_pairing(&info.key_id, secret)
                .await
                .expect("secret persisted");
        }
        state
    }
}
