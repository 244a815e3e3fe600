//! Bearer-token middleware for protected routes.
//!
//! Resolves the presented token to an `Identity` and stashes it in the
//! request extensions. Missing or bad tokens still reach the handler, as
//! the anonymous identity; only a malformed presentation is rejected here.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::header::CONTENT_TYPE,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::context::AppState;
use crate::errors::OAuthError;
use crate::oauth::resource_server::extract_bearer;

/// Upper bound on buffered form bodies
const FORM_BODY_LIMIT: usize = 64 * 1024;

/// The subject the host's session layer authenticated, inserted as a
/// request extension ahead of the authorize endpoint.
#[derive(Debug, Clone)]
pub struct AuthenticatedSubject(pub String);

/// Resolve the bearer token (header, `access_token` form field, or
/// `access_token` query parameter) and insert the resulting identity into
/// the request extensions.
///
/// Form-encoded bodies are buffered and replayed so the handler still
/// sees them.
pub async fn authenticate_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let query_token = request.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "access_token")
            .map(|(_, v)| v.to_string())
    });

    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim() == "application/x-www-form-urlencoded");

    let (parts, body) = request.into_parts();
    let (form_token, body) = if is_form {
        let bytes = match to_bytes(body, FORM_BODY_LIMIT).await {
            Ok(bytes) => bytes,
            Err(_) => {
                return OAuthError::InvalidRequest("unreadable request body".to_string())
                    .into_response();
            }
        };
        let token = url::form_urlencoded::parse(&bytes)
            .find(|(k, _)| k == "access_token")
            .map(|(_, v)| v.to_string());
        (token, Body::from(bytes))
    } else {
        (None, body)
    };
    let mut request = Request::from_parts(parts, body);

    let token = match extract_bearer(
        request.headers(),
        form_token.as_deref(),
        query_token.as_deref(),
    ) {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };

    let identity = match state.authenticator.authenticate(token.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    request.extensions_mut().insert(identity);
    next.run(request).await
}
