//! Handles POST /oauth/token - exchanges a grant for an access token.

use axum::{Form, Json, extract::State, http::HeaderMap};

use super::context::AppState;
use crate::errors::OAuthError;
use crate::oauth::auth_server::extract_client_auth;
use crate::oauth::types::{TokenForm, TokenRequest, TokenResponse};

/// Handle OAuth token requests
/// POST /oauth/token - form-encoded, client credentials via Basic auth or body
pub async fn handle_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Result<Json<TokenResponse>, OAuthError> {
    let client_auth = extract_client_auth(&headers, &form)?;
    let request = TokenRequest::try_from(form)?;
    let response = state.auth_server.token(request, client_auth).await?;
    Ok(Json(response))
}
