//! Client-side authenticator: owns the client's identities and signs requests.

use chrono::{DateTime, Utc};
use rand::{CryptoRng, RngCore};
use sigil_core::{TokenConfig, MIN_SIGNING_KEY_BITS};
use sigil_crypto::{CryptoError, RsaEngine};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::client::{ClientAuthenticationScope, ClientIdentifier, ClientKeyIdentifier};
use crate::error::{IdentityError, IdentityResult};
use crate::pairing::{decode_challenge, ConditionalToken};
use crate::request::{RequestSigner, SecurityToken};
use crate::secret::SharedSecret;
use crate::store::{ClientSecretInfo, PrivateKeyStore};

/// Signs outgoing requests for every user and client identity it knows.
pub struct ClientAuthenticator {
    engine: RsaEngine,
    signer: RequestSigner,
    store: Arc<dyn PrivateKeyStore>,
    user_ids: RwLock<BTreeSet<String>>,
    client_ids: RwLock<BTreeSet<String>>,
}

impl ClientAuthenticator {
    /// Builds an authenticator over `store`, indexing the identities already
    /// persisted there.
    pub async fn new(
        engine: RsaEngine,
        store: Arc<dyn PrivateKeyStore>,
        config: &TokenConfig,
    ) -> IdentityResult<Self> {
        let mut user_ids = BTreeSet::new();
        let mut client_ids = BTreeSet::new();
        for key_id in store.list_identities().await? {
            index_insert(&key_id, &mut user_ids, &mut client_ids);
        }
        info!(
            users = user_ids.len(),
            clients = client_ids.len(),
            "Loaded client identities"
        );

        Ok(Self {
            signer: RequestSigner::new(engine.clone(), config),
            engine,
            store,
            user_ids: RwLock::new(user_ids),
            client_ids: RwLock::new(client_ids),
        })
    }

    pub fn available_user_ids(&self) -> Vec<String> {
        let ids = self.user_ids.read().unwrap_or_else(|e| e.into_inner());
        ids.iter().cloned().collect()
    }

    pub fn available_client_ids(&self) -> Vec<String> {
        let ids = self.client_ids.read().unwrap_or_else(|e| e.into_inner());
        ids.iter().cloned().collect()
    }

    /// Persists a new identity. An identity already on file under the same
    /// key identifier must be logged out first.
    pub async fn register_identity(&self, info: ClientSecretInfo) -> IdentityResult<()> {
        let key_id = info.key_id.clone();
        if self.store.load_identity(&key_id).await?.is_some() {
            return Err(IdentityError::IdentityExists {
                key_id: key_id.to_string(),
            });
        }

        self.store.store_identity(info).await?;
        {
            let mut users = self.user_ids.write().unwrap_or_else(|e| e.into_inner());
            let mut clients = self.client_ids.write().unwrap_or_else(|e| e.into_inner());
            index_insert(&key_id, &mut users, &mut clients);
        }
        info!(%key_id, "Registered identity");
        Ok(())
    }

    /// Generates a fresh key pair for `client` under `scope` and registers it.
    /// The returned record has no secret until pairing completes.
    pub async fn generate_identity<R: RngCore + CryptoRng + Send + ?Sized>(
        &self,
        client: &ClientIdentifier,
        scope: ClientAuthenticationScope,
        key_bits: u32,
        rng: &mut R,
    ) -> IdentityResult<ClientSecretInfo> {
        if key_bits < MIN_SIGNING_KEY_BITS {
            return Err(CryptoError::InvalidKeyLength {
                bits: key_bits,
                reason: format!(
                    "request signing needs at least {} bits",
                    MIN_SIGNING_KEY_BITS
                ),
            }
            .into());
        }
        let private_key = self.engine.generate_key(key_bits, rng)?;
        let info = ClientSecretInfo::new(client.clone(), scope, private_key)?;
        self.register_identity(info.clone()).await?;
        Ok(info)
    }

    /// Removes a user identity and its key material.
    pub async fn log_out_user(&self, user_id: &str) -> IdentityResult<()> {
        let key_id = ClientKeyIdentifier::user(user_id)?;
        if !self.store.delete_identity(&key_id).await? {
            return Err(IdentityError::IdentityNotFound {
                key_id: key_id.to_string(),
            });
        }

        self.user_ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
        info!(%key_id, "User logged out");
        Ok(())
    }

    /// Answers a pairing challenge with the stored private key.
    ///
    /// Nothing is persisted here. Once the server reports the pairing as
    /// authorized, hand [`ConditionalToken::secret`] to
    /// [`complete_pairing`](Self::complete_pairing).
    pub async fn answer_challenge(
        &self,
        key_id: &ClientKeyIdentifier,
        challenge: &str,
    ) -> IdentityResult<ConditionalToken> {
        let info = self.load(key_id).await?;
        Ok(decode_challenge(&self.engine, challenge, &info.private_key))
    }

    /// Persists the secret negotiated for `key_id`.
    pub async fn complete_pairing(
        &self,
        key_id: &ClientKeyIdentifier,
        secret: SharedSecret,
    ) -> IdentityResult<()> {
        let info = self.load(key_id).await?;
        self.store_secret(info, secret).await
    }

    /// Signs one token for the user identity and one for the client identity
    /// of `client`, for whichever of the two this authenticator holds.
    pub async fn authenticate_request<R: RngCore + CryptoRng + Send + ?Sized>(
        &self,
        client: &ClientIdentifier,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> IdentityResult<Vec<SecurityToken>> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(user_id) = client.user_id.as_deref() {
            if self.knows(&self.user_ids, user_id) {
                candidates.push(ClientKeyIdentifier::user(user_id)?);
            }
        }
        if let Some(client_id) = client.client_id.as_deref() {
            if self.knows(&self.client_ids, client_id) {
                candidates.push(ClientKeyIdentifier::client(client_id)?);
            }
        }

        let mut tokens = Vec::with_capacity(candidates.len());
        for key_id in candidates {
            let Some(info) = self.store.load_identity(&key_id).await? else {
                warn!(%key_id, "Indexed identity missing from store");
                continue;
            };
            let Some(secret) = info.secret.as_ref() else {
                error!(%key_id, "Identity has no negotiated secret, pair it before signing");
                continue;
            };

            let token = match self.signer.sign(&info.private_key, secret, now, rng) {
                Ok(token) => token,
                Err(e) => {
                    error!(%key_id, error = %e, "Failed to sign request token");
                    continue;
                }
            };
            debug!(%key_id, "Signed request token");
            tokens.push(token.to_security_token(key_id.scope()));
        }
        Ok(tokens)
    }

    fn knows(&self, index: &RwLock<BTreeSet<String>>, id: &str) -> bool {
        index.read().unwrap_or_else(|e| e.into_inner()).contains(id)
    }

    async fn load(&self, key_id: &ClientKeyIdentifier) -> IdentityResult<ClientSecretInfo> {
        self.store
            .load_identity(key_id)
            .await?
            .ok_or_else(|| IdentityError::IdentityNotFound {
                key_id: key_id.to_string(),
            })
    }

    async fn store_secret(
        &self,
        mut info: ClientSecretInfo,
        secret: SharedSecret,
    ) -> IdentityResult<()> {
        let key_id = info.key_id.clone();
        info.secret = Some(secret);
        self.store.store_identity(info).await?;
        info!(%key_id, "Stored negotiated secret");
        Ok(())
    }
}

fn index_insert(
    key_id: &ClientKeyIdentifier,
    users: &mut BTreeSet<String>,
    clients: &mut BTreeSet<String>,
) {
    match key_id.scope() {
        ClientAuthenticationScope::User => {
            if let Some(id) = key_id.user_id() {
                users.insert(id.to_string());
            }
        }
        ClientAuthenticationScope::Client => {
            if let Some(id) = key_id.client_id() {
                clients.insert(id.to_string());
            }
        }
        // Combined identities are stored but not used for request signing.
        ClientAuthenticationScope::UserClient => {}
    }
}
