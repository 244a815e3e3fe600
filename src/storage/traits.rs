//! Storage trait definitions for the credential store.
//!
//! Defines async capability interfaces for realms, clients, scopes, codes,
//! tokens, resource owners, and pending authorizations that can be
//! implemented by any persistence backend.

use crate::errors::StorageError;
use crate::oauth::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for storing and retrieving realms
#[async_trait]
pub trait RealmStore: Send + Sync {
    /// Store or replace a realm
    async fn put_realm(&self, realm: &Realm) -> Result<()>;

    /// Retrieve a realm by id
    async fn get_realm(&self, realm_id: &str) -> Result<Option<Realm>>;
}

/// Trait for storing and authenticating clients
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Store or replace a client
    async fn put_client(&self, client: &Client) -> Result<()>;

    /// Retrieve a client by id
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>>;

    /// Check a supplied secret against the stored digest in constant time.
    /// A client marked as not requiring a secret accepts a missing or empty
    /// value; every other combination must match the digest.
    async fn verify_client_secret(&self, client_id: &str, supplied: Option<&str>) -> Result<bool>;

    /// Whether the client's realm permits the grant type. The implicit flow
    /// is gated by the realm's dedicated toggle, not the generic allow list.
    async fn is_grant_type_allowed(&self, client_id: &str, grant_type: GrantType) -> Result<bool>;
}

/// Trait for the realm-scoped scope catalogue
#[async_trait]
pub trait ScopeStore: Send + Sync {
    /// Store or replace a scope definition
    async fn put_scope(&self, scope: &ScopeDef) -> Result<()>;

    /// Retrieve a single scope by realm and name
    async fn get_scope(&self, realm_id: &str, name: &str) -> Result<Option<ScopeDef>>;

    /// Retrieve exactly the named scopes from a realm's catalogue. Names
    /// without a definition are simply absent from the result.
    async fn get_scopes(&self, realm_id: &str, names: &BTreeSet<String>) -> Result<Vec<ScopeDef>>;
}

/// Trait for storing and redeeming authorization codes
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    /// Store an authorization code. Idempotent on the code value: a second
    /// put overwrites lifetime and scope.
    async fn put_code(&self, code: &AuthorizationCode) -> Result<()>;

    /// Retrieve a code without consuming it
    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Atomically check-and-remove a code. Of any number of concurrent
    /// calls for the same value, exactly one receives the record. Expired
    /// records are dropped and reported as absent.
    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Remove expired codes, returning how many were dropped
    async fn cleanup_expired_codes(&self) -> Result<usize>;
}

/// Trait for storing and retrieving access tokens
#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    /// Store an access token. Idempotent on the token value.
    async fn put_access_token(&self, token: &AccessToken) -> Result<()>;

    /// Retrieve an access token. Expiry is judged by the caller against the
    /// record's own `expires_at`.
    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>>;

    /// Delete an access token
    async fn revoke_access_token(&self, token: &str) -> Result<()>;

    /// Remove expired tokens, returning how many were dropped
    async fn cleanup_expired_tokens(&self) -> Result<usize>;
}

/// Trait for storing and redeeming refresh tokens
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Store a refresh token. Idempotent on the token value.
    async fn put_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    /// Retrieve a refresh token without consuming it
    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Atomically check-and-remove a refresh token. Rotation is built on
    /// this: the handler takes the token, mints replacements, and re-stores
    /// the original only under the keep-original policy, so two concurrent
    /// redemptions can never both succeed. Expired records are dropped and
    /// reported as absent.
    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Delete a refresh token
    async fn revoke_refresh_token(&self, token: &str) -> Result<()>;

    /// Remove expired refresh tokens, returning how many were dropped
    async fn cleanup_expired_refresh_tokens(&self) -> Result<usize>;
}

/// A resource owner known to the store, for the password grant
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(any(debug_assertions, test), derive(Debug))]
pub struct ResourceOwner {
    pub username: String,
    /// SHA-256 digest of the password, hex-encoded
    pub password_digest: String,
    pub subject_id: String,
}

/// Trait for resource-owner credential checks (password grant)
#[async_trait]
pub trait ResourceOwnerStore: Send + Sync {
    /// Store or replace a resource owner
    async fn put_resource_owner(&self, owner: &ResourceOwner) -> Result<()>;

    /// Verify a username/password pair in constant time
    async fn verify_resource_owner_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool>;

    /// Resolve a username to its subject id
    async fn get_subject_id(&self, username: &str) -> Result<Option<String>>;
}

/// A suspended authorize interaction, keyed by an opaque continuation token
/// carried through the login redirect. Consumed exactly once.
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(any(debug_assertions, test), derive(Debug))]
pub struct PendingAuthorization {
    pub continuation: String,
    pub request: AuthorizationRequest,
    pub realm_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Trait for storing pending (suspended) authorization requests
#[async_trait]
pub trait PendingAuthorizationStore: Send + Sync {
    /// Store a pending authorization
    async fn put_pending(&self, pending: &PendingAuthorization) -> Result<()>;

    /// Atomically remove and return a pending authorization. Expired
    /// records are dropped and reported as absent.
    async fn consume_pending(&self, continuation: &str) -> Result<Option<PendingAuthorization>>;

    /// Remove expired pending authorizations, returning how many were dropped
    async fn cleanup_expired_pending(&self) -> Result<usize>;
}

/// Combined credential storage trait consumed by the protocol engine
pub trait CredentialStore:
    RealmStore
    + ClientStore
    + ScopeStore
    + AuthorizationCodeStore
    + AccessTokenStore
    + RefreshTokenStore
    + ResourceOwnerStore
    + PendingAuthorizationStore
    + Send
    + Sync
{
}
