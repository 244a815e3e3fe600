//! Handles GET /oauth/tokens/{token} - token verification endpoint.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};

use super::context::AppState;
use crate::oauth::types::TokenType;
use crate::storage::CredentialStore as _;

/// Public view of an access-token record. Resource servers poll this to
/// verify tokens they receive.
#[derive(Debug, Serialize)]
pub struct TokenVerification {
    pub access_token: String,
    pub token_type: TokenType,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Seconds until expiry, from now
    pub expires_in: u64,
}

/// Handle GET /oauth/tokens/{token}
///
/// Absent and expired records both answer 404; the endpoint never reveals
/// which one it was.
pub async fn handle_tokens(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<TokenVerification>, (StatusCode, Json<Value>)> {
    let record = state.storage.get_access_token(&token).await.map_err(|e| {
        tracing::error!(error = ?e, "credential store failure");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "server_error"})),
        )
    })?;

    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not_found", "error_description": "token not found"})),
        )
    };

    let record = record.ok_or_else(not_found)?;
    let now = Utc::now();
    if record.expires_at <= now {
        return Err(not_found());
    }

    Ok(Json(TokenVerification {
        access_token: record.token,
        token_type: record.token_type,
        client_id: record.client_id,
        subject: record.subject,
        scope: record.scope,
        expires_in: (record.expires_at - now).num_seconds().max(0) as u64,
    }))
}
