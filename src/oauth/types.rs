//! OAuth2 core types and data structures.
//!
//! Defines realms, clients, scopes, codes, tokens, and the request/response
//! shapes used by the authorize and token endpoints.

use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use subtle::ConstantTimeEq;

use crate::errors::OAuthError;

/// OAuth2 grant types (RFC 6749 section 1.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
    Password,
    /// Only reachable through the authorize endpoint. Enabled per realm by a
    /// dedicated toggle, never by the generic grant-type allow list.
    Implicit,
}

/// OAuth2 response types for the authorize endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
}

/// OAuth2 token types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Bearer,
}

/// Refresh-token handling on redemption, selected per realm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshRotation {
    /// Issue a new refresh token and revoke the redeemed one
    Rotate,
    /// Keep the redeemed refresh token valid
    KeepOriginal,
}

/// Administrative grouping of clients, scopes, and token policy.
///
/// Grant types are authorized at the realm level; every client in a realm
/// shares the realm's allowed set.
#[derive(Debug, Clone)]
pub struct Realm {
    pub id: String,
    pub name: String,
    /// Scope applied when a request carries none. Must name an existing
    /// scope in this realm's catalogue to take effect.
    pub default_scope: Option<String>,
    pub grant_types: HashSet<GrantType>,
    /// Separate gate for the implicit flow
    pub allow_implicit: bool,
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
    pub refresh_rotation: RefreshRotation,
    /// RFC 6749 section 4.4.3 says client-credentials responses should not
    /// include a refresh token; a realm may opt in regardless.
    pub issue_refresh_on_client_credentials: bool,
}

/// A registered OAuth client, owned by exactly one realm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub client_name: Option<String>,
    /// SHA-256 digest of the client secret, hex-encoded. Never plaintext.
    pub secret_digest: Option<String>,
    /// Public clients set this to false and present no secret
    pub require_secret: bool,
    pub redirect_uris: Vec<String>,
    /// Space-delimited scope the client may request. `None` means any scope
    /// in the realm's catalogue.
    pub allowed_scope: Option<String>,
    /// Skip the consent step on the authorize endpoint
    pub automatic_authorization: bool,
    pub realm_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named permission unit, unique within its realm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeDef {
    pub name: String,
    pub description: String,
    pub realm_id: String,
}

/// One-time-use authorization code, alive between consent and redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub subject: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub realm_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Opaque access token. Read-mostly after issuance; the recorded
/// `expires_at` is authoritative for expiry checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub token_type: TokenType,
    pub client_id: String,
    /// None for client-credentials issuance
    pub subject: Option<String>,
    pub scope: Option<String>,
    pub realm_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Long-lived token exchangeable for a new access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub client_id: String,
    pub subject: Option<String>,
    /// Originally granted scope; refresh exchanges may only narrow it
    pub scope: Option<String>,
    pub realm_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Parsed authorize-endpoint request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub response_type: ResponseType,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    /// Echoed back unmodified on every redirect
    pub state: Option<String>,
}

/// Parsed token-endpoint request
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub grant_type: GrantType,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

/// Token-endpoint success payload
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: TokenType,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn new(
        access_token: String,
        expires_in: u64,
        refresh_token: Option<String>,
        scope: Option<String>,
    ) -> Self {
        Self {
            access_token,
            token_type: TokenType::Bearer,
            expires_in,
            refresh_token,
            scope,
        }
    }
}

/// Form data for the token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

impl TryFrom<TokenForm> for TokenRequest {
    type Error = OAuthError;

    fn try_from(form: TokenForm) -> Result<Self, Self::Error> {
        let grant_type = match form.grant_type.as_str() {
            "authorization_code" => GrantType::AuthorizationCode,
            "client_credentials" => GrantType::ClientCredentials,
            "refresh_token" => GrantType::RefreshToken,
            "password" => GrantType::Password,
            // The implicit flow never reaches the token endpoint
            other => return Err(OAuthError::UnsupportedGrantType(other.to_string())),
        };

        Ok(Self {
            grant_type,
            code: form.code,
            redirect_uri: form.redirect_uri,
            refresh_token: form.refresh_token,
            username: form.username,
            password: form.password,
            client_id: form.client_id,
            client_secret: form.client_secret,
            scope: form.scope,
        })
    }
}

/// Generate a secure random opaque token
pub fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a client secret or resource-owner password for storage
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    base16_encode(&digest)
}

/// Compare a supplied secret against a stored digest in constant time
pub fn verify_secret_digest(stored_digest: &str, supplied: &str) -> bool {
    let supplied_digest = hash_secret(supplied);
    stored_digest
        .as_bytes()
        .ct_eq(supplied_digest.as_bytes())
        .into()
}

fn base16_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Split a whitespace-delimited scope string into a set. The empty string
/// yields the empty set.
pub fn parse_scope(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(|s| s.to_string()).collect()
}

/// Join scopes into a space-separated string, sorted for stable output
pub fn join_scopes(scopes: &BTreeSet<String>) -> String {
    scopes.iter().cloned().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope_empty_string() {
        assert!(parse_scope("").is_empty());
        assert!(parse_scope("   ").is_empty());
    }

    #[test]
    fn test_parse_scope_whitespace_delimited() {
        let scopes = parse_scope("read  write\tadmin");
        assert_eq!(scopes.len(), 3);
        assert!(scopes.contains("read"));
        assert!(scopes.contains("write"));
        assert!(scopes.contains("admin"));
    }

    #[test]
    fn test_join_scopes_sorted() {
        let scopes = parse_scope("write read");
        assert_eq!(join_scopes(&scopes), "read write");
    }

    #[test]
    fn test_secret_digest_roundtrip() {
        let digest = hash_secret("s3cret");
        assert_ne!(digest, "s3cret");
        assert!(verify_secret_digest(&digest, "s3cret"));
        assert!(!verify_secret_digest(&digest, "S3cret"));
        assert!(!verify_secret_digest(&digest, ""));
    }

    #[test]
    fn test_generate_token_unique_and_opaque() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.len() >= 32);
    }

    #[test]
    fn test_token_form_rejects_implicit_at_token_endpoint() {
        let form = TokenForm {
            grant_type: "implicit".to_string(),
            code: None,
            redirect_uri: None,
            refresh_token: None,
            username: None,
            password: None,
            client_id: None,
            client_secret: None,
            scope: None,
        };
        let err = TokenRequest::try_from(form).unwrap_err();
        assert_eq!(err.error_code(), "unsupported_grant_type");
    }
}
