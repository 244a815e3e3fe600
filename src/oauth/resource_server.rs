//! Bearer-token authentication for protected resource requests.
//!
//! Resolves an inbound token to an identity. Absent, unknown, and expired
//! tokens all resolve to the anonymous identity rather than failing the
//! request pipeline; only protocol violations in how the token is presented
//! are errors.

use crate::errors::OAuthError;
use crate::oauth::types::{AccessToken, parse_scope};
use crate::storage::CredentialStore;
use axum::http::HeaderMap;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The identity a bearer token resolves to.
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    Authenticated {
        client_id: String,
        /// None for tokens issued through the client-credentials grant
        subject: Option<String>,
        scopes: BTreeSet<String>,
        token: AccessToken,
    },
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// Whether the identity carries every one of the given scopes. The
    /// anonymous identity carries none.
    pub fn has_scopes(&self, required: &BTreeSet<String>) -> bool {
        match self {
            Identity::Anonymous => required.is_empty(),
            Identity::Authenticated { scopes, .. } => required.is_subset(scopes),
        }
    }
}

/// Validates bearer tokens against the credential store.
pub struct ResourceAuthenticator {
    storage: Arc<dyn CredentialStore>,
}

impl ResourceAuthenticator {
    pub fn new(storage: Arc<dyn CredentialStore>) -> Self {
        Self { storage }
    }

    /// Resolve a presented token to an identity.
    ///
    /// The `expires_at` stamped on the token record is authoritative; no
    /// secondary configured lifetime is consulted. Store failures are the
    /// only error path.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, OAuthError> {
        let Some(token) = token else {
            return Ok(Identity::Anonymous);
        };

        let record = match self.storage.get_access_token(token).await? {
            Some(record) => record,
            None => {
                tracing::debug!("bearer token not found, treating as anonymous");
                return Ok(Identity::Anonymous);
            }
        };

        if record.expires_at <= Utc::now() {
            tracing::debug!(client_id = %record.client_id, "bearer token expired, treating as anonymous");
            return Ok(Identity::Anonymous);
        }

        Ok(Identity::Authenticated {
            client_id: record.client_id.clone(),
            subject: record.subject.clone(),
            scopes: record
                .scope
                .as_deref()
                .map(parse_scope)
                .unwrap_or_default(),
            token: record,
        })
    }
}

/// Extract a bearer token from the Authorization header, form body, or
/// query string (RFC 6750 sections 2.1-2.3).
///
/// The token must arrive in exactly one location; presenting it in more
/// than one is a protocol violation. A non-Bearer Authorization header does
/// not count as a location.
pub fn extract_bearer(
    headers: &HeaderMap,
    form_token: Option<&str>,
    query_token: Option<&str>,
) -> Result<Option<String>, OAuthError> {
    let header_token = match headers.get(http::header::AUTHORIZATION) {
        Some(value) => {
            let value = value.to_str().map_err(|_| {
                OAuthError::InvalidRequest("malformed Authorization header".to_string())
            })?;
            match value.strip_prefix("Bearer ") {
                Some(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
                Some(_) => {
                    return Err(OAuthError::InvalidRequest(
                        "empty bearer token".to_string(),
                    ));
                }
                None => None,
            }
        }
        None => None,
    };

    let presented = [
        header_token.as_deref(),
        form_token,
        query_token,
    ];
    let mut found = presented.iter().flatten();
    let token = found.next().map(|t| t.to_string());
    if found.next().is_some() {
        return Err(OAuthError::InvalidRequest(
            "access token presented in more than one location".to_string(),
        ));
    }

    Ok(token)
}
