//! Key and secret stores.
//!
//! The server keeps one [`ServerAuthState`] per paired key identifier; the
//! client keeps one [`ClientSecretInfo`] per identity it can sign for. Both
//! sides are reached through async traits so persistent backends can sit
//! behind them. The in-memory versions here back tests and single-process
//! deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sigil_crypto::{PrivateKeyMaterial, PublicKeyMaterial};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::client::{ClientAuthenticationScope, ClientIdentifier, ClientKeyIdentifier};
use crate::error::IdentityResult;
use crate::secret::SharedSecret;

/// Server-side record for one paired key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAuthState {
    pub client_info: ClientIdentifier,
    pub key_scope: ClientAuthenticationScope,
    /// Set once the pairing challenge was answered correctly
    pub trusted: bool,
    pub public_key: PublicKeyMaterial,
    pub secret: Option<SharedSecret>,
}

impl ServerAuthState {
    pub fn key_id(&self) -> IdentityResult<ClientKeyIdentifier> {
        ClientKeyIdentifier::from_client(&self.client_info, self.key_scope)
    }
}

/// Client-side record for one identity the client can sign as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSecretInfo {
    pub key_id: ClientKeyIdentifier,
    pub client_info: ClientIdentifier,
    pub private_key: PrivateKeyMaterial,
    pub secret: Option<SharedSecret>,
    /// Name of the provider that vouched for the user, if any
    pub auth_provider: Option<String>,
}

impl ClientSecretInfo {
    pub fn new(
        client_info: ClientIdentifier,
        scope: ClientAuthenticationScope,
        private_key: PrivateKeyMaterial,
    ) -> IdentityResult<Self> {
        let key_id = ClientKeyIdentifier::from_client(&client_info, scope)?;
        Ok(Self {
            key_id,
            client_info: client_info.sanitized(scope),
            private_key,
            secret: None,
            auth_provider: None,
        })
    }

    pub fn with_auth_provider(mut self, provider: impl Into<String>) -> Self {
        self.auth_provider = Some(provider.into());
        self
    }
}

/// Server-side store of paired public keys.
#[async_trait]
pub trait PublicKeyStore: Send + Sync {
    async fn get_client_state(
        &self,
        key_id: &ClientKeyIdentifier,
    ) -> IdentityResult<Option<ServerAuthState>>;

    /// Inserts or replaces the record keyed by `state.key_id()`.
    async fn update_client_state(&self, state: ServerAuthState) -> IdentityResult<()>;

    /// Returns whether a record was removed.
    async fn delete_client_state(&self, key_id: &ClientKeyIdentifier) -> IdentityResult<bool>;
}

/// Client-side store of private keys and negotiated secrets.
#[async_trait]
pub trait PrivateKeyStore: Send + Sync {
    async fn load_identity(
        &self,
        key_id: &ClientKeyIdentifier,
    ) -> IdentityResult<Option<ClientSecretInfo>>;

    async fn store_identity(&self, info: ClientSecretInfo) -> IdentityResult<()>;

    async fn delete_identity(&self, key_id: &ClientKeyIdentifier) -> IdentityResult<bool>;

    async fn list_identities(&self) -> IdentityResult<Vec<ClientKeyIdentifier>>;
}

#[derive(Debug, Default)]
pub struct InMemoryPublicKeyStore {
    states: RwLock<HashMap<ClientKeyIdentifier, ServerAuthState>>,
}

impl InMemoryPublicKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PublicKeyStore for InMemoryPublicKeyStore {
    async fn get_client_state(
        &self,
        key_id: &ClientKeyIdentifier,
    ) -> IdentityResult<Option<ServerAuthState>> {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        Ok(states.get(key_id).cloned())
    }

    async fn update_client_state(&self, state: ServerAuthState) -> IdentityResult<()> {
        let key_id = state.key_id()?;
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.insert(key_id, state);
        Ok(())
    }

    async fn delete_client_state(&self, key_id: &ClientKeyIdentifier) -> IdentityResult<bool> {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        Ok(states.remove(key_id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPrivateKeyStore {
    identities: RwLock<HashMap<ClientKeyIdentifier, ClientSecretInfo>>,
}

impl InMemoryPrivateKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, e.g. from a JSON snapshot.
    pub fn with_identities(identities: impl IntoIterator<Item = ClientSecretInfo>) -> Self {
        let map = identities
            .into_iter()
            .map(|info| (info.key_id.clone(), info))
            .collect();
        Self {
            identities: RwLock::new(map),
        }
    }

    /// Serializes every identity, private keys included, as a JSON array.
    pub fn export_json(&self) -> IdentityResult<String> {
        let identities = self.identities.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<&ClientSecretInfo> = identities.values().collect();
        records.sort_by_key(|info| info.key_id.to_string());
        Ok(serde_json::to_string_pretty(&records)?)
    }

    pub fn import_json(json: &str) -> IdentityResult<Self> {
        let records: Vec<ClientSecretInfo> = serde_json::from_str(json)?;
        Ok(Self::with_identities(records))
    }
}

#[async_trait]
impl PrivateKeyStore for InMemoryPrivateKeyStore {
    async fn load_identity(
        &self,
        key_id: &ClientKeyIdentifier,
    ) -> IdentityResult<Option<ClientSecretInfo>> {
        let identities = self.identities.read().unwrap_or_else(|e| e.into_inner());
        Ok(identities.get(key_id).cloned())
    }

    async fn store_identity(&self, info: ClientSecretInfo) -> IdentityResult<()> {
        let mut identities = self.identities.write().unwrap_or_else(|e| e.into_inner());
        identities.insert(info.key_id.clone(), info);
        Ok(())
    }

    async fn delete_identity(&self, key_id: &ClientKeyIdentifier) -> IdentityResult<bool> {
        let mut identities = self.identities.write().unwrap_or_else(|e| e.into_inner());
        Ok(identities.remove(key_id).is_some())
    }

    async fn list_identities(&self) -> IdentityResult<Vec<ClientKeyIdentifier>> {
        let identities = self.identities.read().unwrap_or_else(|e| e.into_inner());
        Ok(identities.keys().cloned().collect())
    }
}
