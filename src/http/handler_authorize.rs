//! Handles GET/POST /oauth/authorize and the consent decision submission.

use axum::{
    Form, Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;

use super::context::AppState;
use super::middleware_auth::AuthenticatedSubject;
use crate::errors::OAuthError;
use crate::oauth::auth_server::AuthorizeOutcome;
use crate::oauth::types::{AuthorizationRequest, ResponseType};
use axum::Extension;

/// Query/form parameters of the authorize endpoint (RFC 6749 sections
/// 4.1.1, 4.2.1)
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
}

impl TryFrom<AuthorizeParams> for AuthorizationRequest {
    type Error = OAuthError;

    fn try_from(params: AuthorizeParams) -> Result<Self, Self::Error> {
        let response_type = match params.response_type.as_str() {
            "code" => ResponseType::Code,
            "token" => ResponseType::Token,
            other => return Err(OAuthError::UnsupportedResponseType(other.to_string())),
        };
        Ok(Self {
            response_type,
            client_id: params.client_id,
            redirect_uri: params.redirect_uri,
            scope: params.scope,
            state: params.state,
        })
    }
}

/// Consent decision resuming a suspended authorize interaction
#[derive(Debug, Deserialize)]
pub struct DecisionForm {
    pub continuation: String,
    /// "approve" or "deny"
    pub decision: String,
}

fn render_outcome(outcome: AuthorizeOutcome) -> Response {
    match outcome {
        AuthorizeOutcome::Redirect(url) => Redirect::to(&url).into_response(),
        AuthorizeOutcome::RequireLogin { continuation } => Json(json!({
            "status": "login_required",
            "continuation": continuation,
        }))
        .into_response(),
        AuthorizeOutcome::ConsentRequired {
            continuation,
            client_name,
            scope,
        } => Json(json!({
            "status": "consent_required",
            "continuation": continuation,
            "client_name": client_name,
            "scope": scope,
        }))
        .into_response(),
    }
}

/// Handle GET /oauth/authorize
///
/// The authenticated subject, when there is one, arrives as a request
/// extension inserted by the host's session layer.
pub async fn handle_authorize(
    State(state): State<AppState>,
    subject: Option<Extension<AuthenticatedSubject>>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, OAuthError> {
    let request = AuthorizationRequest::try_from(params)?;
    let subject = subject.as_ref().map(|s| s.0.0.as_str());
    let outcome = state.auth_server.begin_authorize(request, subject).await?;
    Ok(render_outcome(outcome))
}

/// Handle POST /oauth/authorize (form-encoded variant)
pub async fn handle_authorize_post(
    State(state): State<AppState>,
    subject: Option<Extension<AuthenticatedSubject>>,
    Form(params): Form<AuthorizeParams>,
) -> Result<Response, OAuthError> {
    let request = AuthorizationRequest::try_from(params)?;
    let subject = subject.as_ref().map(|s| s.0.0.as_str());
    let outcome = state.auth_server.begin_authorize(request, subject).await?;
    Ok(render_outcome(outcome))
}

/// Handle POST /oauth/authorize/decision
pub async fn handle_decision(
    State(state): State<AppState>,
    subject: Option<Extension<AuthenticatedSubject>>,
    Form(form): Form<DecisionForm>,
) -> Result<Response, OAuthError> {
    let Some(Extension(AuthenticatedSubject(subject))) = subject else {
        return Err(OAuthError::InvalidRequest(
            "a consent decision requires an authenticated subject".to_string(),
        ));
    };

    let approved = match form.decision.as_str() {
        "approve" => true,
        "deny" => false,
        other => {
            return Err(OAuthError::InvalidRequest(format!(
                "unknown decision '{}'",
                other
            )));
        }
    };

    let outcome = state
        .auth_server
        .resume_authorize(&form.continuation, &subject, approved)
        .await?;
    Ok(render_outcome(outcome))
}
