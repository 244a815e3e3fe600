//! Standardized error types following the `error-oauthd-<domain>-<number>` format.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-oauthd-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when PORT cannot be parsed
    #[error("error-oauthd-config-2 Parsing PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-oauthd-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-oauthd-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when a seed file cannot be read or parsed
    #[error("error-oauthd-config-5 Failed to load seed file '{0}': {1}")]
    SeedLoadFailed(String, String),
}

/// OAuth protocol errors, surfaced to clients per RFC 6749 section 5.2
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Malformed or incomplete request
    #[error("error-oauthd-oauth-1 Invalid request: {0}")]
    InvalidRequest(String),

    /// Client authentication failed or client unknown
    #[error("error-oauthd-oauth-2 Invalid client: {0}")]
    InvalidClient(String),

    /// Invalid, expired, consumed, or mismatched grant credential
    #[error("error-oauthd-oauth-3 Invalid grant: {0}")]
    InvalidGrant(String),

    /// Client is not permitted to use this grant type
    #[error("error-oauthd-oauth-4 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Grant type is not recognized or not enabled
    #[error("error-oauthd-oauth-5 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Requested scope exceeds what may be granted
    #[error("error-oauthd-oauth-6 Invalid scope: {0}")]
    InvalidScope(String),

    /// Resource owner denied the authorization request
    #[error("error-oauthd-oauth-7 Access denied: {0}")]
    AccessDenied(String),

    /// Unsupported response type on the authorize endpoint
    #[error("error-oauthd-oauth-8 Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Internal failure; detail is logged, never sent to the client
    #[error("error-oauthd-oauth-9 Server error")]
    ServerError(String),
}

impl OAuthError {
    /// Canonical RFC 6749 error identifier for the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::AccessDenied(_) => "access_denied",
            OAuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    /// HTTP status for token-endpoint error responses (RFC 6749 section 5.2).
    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Description safe to return to the client. Internal detail carried by
    /// `ServerError` is logged at the construction site and withheld here.
    pub fn public_description(&self) -> String {
        match self {
            OAuthError::ServerError(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Storage backend errors. These are infrastructure failures and are never
/// translated into protocol error codes; callers log them and answer with a
/// generic `server_error`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when a lock or connection cannot be acquired
    #[error("error-oauthd-storage-1 Backend unavailable: {0}")]
    Unavailable(String),

    /// Error when a storage operation fails
    #[error("error-oauthd-storage-2 Operation failed: {0}")]
    OperationFailed(String),

    /// Error when stored data cannot be decoded
    #[error("error-oauthd-storage-3 Invalid data: {0}")]
    InvalidData(String),
}

impl From<StorageError> for OAuthError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = ?err, "credential store failure");
        OAuthError::ServerError(err.to_string())
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let body = axum::Json(serde_json::json!({
            "error": self.error_code(),
            "error_description": self.public_description(),
        }));
        (self.status(), body).into_response()
    }
}
