//! Main router configuration assembling the OAuth endpoints.

use axum::{
    Extension, Json, Router,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    context::AppState,
    handler_authorize::{handle_authorize, handle_authorize_post, handle_decision},
    handler_token::handle_token,
    handler_tokens::handle_tokens,
    middleware_auth::authenticate_bearer,
};
use crate::oauth::resource_server::Identity;

/// Build the application router
pub fn build_router(ctx: AppState) -> Router {
    let oauth_routes = Router::new()
        .route("/authorize", get(handle_authorize).post(handle_authorize_post))
        .route("/authorize/decision", post(handle_decision))
        .route("/token", post(handle_token))
        .route("/tokens/{token}", get(handle_tokens));

    // Protected API routes resolve the bearer token before the handler runs
    let protected_api_routes = Router::new()
        .route("/session", get(handle_session).post(handle_session))
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            authenticate_bearer,
        ));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    Router::new()
        .nest("/oauth", oauth_routes)
        .nest("/api", protected_api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Report who the presented bearer token belongs to.
/// GET/POST /api/session (POST for the form-encoded token presentation)
async fn handle_session(
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match identity {
        Identity::Authenticated {
            client_id,
            subject,
            scopes,
            ..
        } => Ok(Json(json!({
            "client_id": client_id,
            "subject": subject,
            "scope": scopes.iter().cloned().collect::<Vec<_>>().join(" "),
        }))),
        Identity::Anonymous => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "invalid_token",
                "error_description": "the request is not authenticated",
            })),
        )),
    }
}
