//! Client identity and key scoping.
//!
//! A [`ClientIdentifier`] names who is talking (a user, a client program, or
//! both). A [`ClientAuthenticationScope`] picks which of those ids a key pair
//! is bound to, and [`ClientKeyIdentifier`] is the resulting store key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{IdentityError, IdentityResult};

/// User and client ids plus their display names.
///
/// Equality and hashing look at the ids only; names are informational.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientIdentifier {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
}

impl ClientIdentifier {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        client_id: impl Into<String>,
        client_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            user_name: Some(user_name.into()),
            client_id: Some(client_id.into()),
            client_name: Some(client_name.into()),
        }
    }

    /// Identifier carrying only a client id and name.
    pub fn client(client_id: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_name: Some(client_name.into()),
            ..Self::default()
        }
    }

    /// Identifier carrying only a user id and name.
    pub fn user(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            user_name: Some(user_name.into()),
            ..Self::default()
        }
    }

    /// Scheme prefix of the user id (`"google"` in `"google:1234"`).
    pub fn user_id_scheme(&self) -> Option<&str> {
        self.user_id.as_deref().and_then(|id| split_scheme(id).0)
    }

    /// User id with any scheme prefix removed.
    pub fn user_id_value(&self) -> Option<&str> {
        self.user_id.as_deref().map(|id| split_scheme(id).1)
    }

    pub fn client_id_scheme(&self) -> Option<&str> {
        self.client_id.as_deref().and_then(|id| split_scheme(id).0)
    }

    pub fn client_id_value(&self) -> Option<&str> {
        self.client_id.as_deref().map(|id| split_scheme(id).1)
    }

    /// Copy keeping only the components `scope` binds to.
    pub fn sanitized(&self, scope: ClientAuthenticationScope) -> Self {
        let mut out = self.clone();
        if !scope.includes_client() {
            out.client_id = None;
            out.client_name = None;
        }
        if !scope.includes_user() {
            out.user_id = None;
            out.user_name = None;
        }
        out
    }
}

fn split_scheme(id: &str) -> (Option<&str>, &str) {
    match id.split_once(':') {
        Some((scheme, value)) => (Some(scheme), value),
        None => (None, id),
    }
}

impl PartialEq for ClientIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id && self.user_id == other.user_id
    }
}

impl Eq for ClientIdentifier {}

impl Hash for ClientIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.client_id.hash(state);
        self.user_id.hash(state);
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = self.user_id.as_deref().unwrap_or("-");
        let client = self.client_id.as_deref().unwrap_or("-");
        write!(f, "{}@{}", user, client)
    }
}

/// Which identity components a key pair is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ClientAuthenticationScope {
    Client = 1,
    User = 2,
    UserClient = 3,
}

impl ClientAuthenticationScope {
    pub fn includes_client(self) -> bool {
        matches!(self, Self::Client | Self::UserClient)
    }

    pub fn includes_user(self) -> bool {
        matches!(self, Self::User | Self::UserClient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::User => "user",
            Self::UserClient => "userclient",
        }
    }
}

impl TryFrom<u8> for ClientAuthenticationScope {
    type Error = IdentityError;

    fn try_from(value: u8) -> IdentityResult<Self> {
        match value {
            1 => Ok(Self::Client),
            2 => Ok(Self::User),
            3 => Ok(Self::UserClient),
            other => Err(IdentityError::InvalidScope(other)),
        }
    }
}

impl From<ClientAuthenticationScope> for u8 {
    fn from(scope: ClientAuthenticationScope) -> u8 {
        scope as u8
    }
}

impl FromStr for ClientAuthenticationScope {
    type Err = IdentityError;

    fn from_str(s: &str) -> IdentityResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "user" => Ok(Self::User),
            "userclient" => Ok(Self::UserClient),
            _ => Err(IdentityError::InvalidScope(0)),
        }
    }
}

impl fmt::Display for ClientAuthenticationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store key for one key pair: the scope plus exactly the ids it binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientKeyIdentifier {
    scope: ClientAuthenticationScope,
    client_id: Option<String>,
    user_id: Option<String>,
}

impl ClientKeyIdentifier {
    /// Builds a key identifier, dropping ids the scope does not bind.
    pub fn new(
        scope: ClientAuthenticationScope,
        client_id: Option<String>,
        user_id: Option<String>,
    ) -> IdentityResult<Self> {
        let client_id = if scope.includes_client() {
            Some(require(client_id, scope, "client")?)
        } else {
            None
        };
        let user_id = if scope.includes_user() {
            Some(require(user_id, scope, "user")?)
        } else {
            None
        };

        Ok(Self {
            scope,
            client_id,
            user_id,
        })
    }

    pub fn from_client(
        client: &ClientIdentifier,
        scope: ClientAuthenticationScope,
    ) -> IdentityResult<Self> {
        Self::new(scope, client.client_id.clone(), client.user_id.clone())
    }

    pub fn client(client_id: impl Into<String>) -> IdentityResult<Self> {
        Self::new(
            ClientAuthenticationScope::Client,
            Some(client_id.into()),
            None,
        )
    }

    pub fn user(user_id: impl Into<String>) -> IdentityResult<Self> {
        Self::new(ClientAuthenticationScope::User, None, Some(user_id.into()))
    }

    pub fn scope(&self) -> ClientAuthenticationScope {
        self.scope
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

fn require(
    id: Option<String>,
    scope: ClientAuthenticationScope,
    component: &'static str,
) -> IdentityResult<String> {
    match id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(IdentityError::MissingIdentifier {
            scope: scope.as_str(),
            component,
        }),
    }
}

impl fmt::Display for ClientKeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = self.user_id.as_deref().unwrap_or_default();
        let client = self.client_id.as_deref().unwrap_or_default();
        match self.scope {
            ClientAuthenticationScope::Client => write!(f, "client:{}", client),
            ClientAuthenticationScope::User => write!(f, "user:{}", user),
            ClientAuthenticationScope::UserClient => write!(f, "userclient:{}/{}", user, client),
        }
    }
}

/// Outcome of verifying a signed request, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuthLevel {
    /// No record, or no shared secret, for the key identifier
    Unknown,
    /// Key is on file but pairing never completed
    Unverified,
    /// Signature did not match
    Unauthorized,
    /// Signature matched a token whose expiry has passed
    RequestExpired,
    Authorized,
}

impl AuthLevel {
    pub fn is_authorized(self) -> bool {
        self == Self::Authorized
    }
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Unverified => "unverified",
            Self::Unauthorized => "unauthorized",
            Self::RequestExpired => "request-expired",
            Self::Authorized => "authorized",
        };
        f.write_str(name)
    }
}
