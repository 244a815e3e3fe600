//! Core OAuth2 authorization server handling the authorize interaction and
//! token-endpoint grant exchanges.

use crate::errors::OAuthError;
use crate::oauth::scopes::{Available, ScopeEvaluator};
use crate::oauth::types::*;
use crate::storage::{CredentialStore, PendingAuthorization};
use axum::http::HeaderMap;
use base64::prelude::*;
use chrono::{Duration, Utc};
use std::sync::Arc;
use url::Url;

/// OAuth2 authorization server.
///
/// Stateless over the credential store: every request may be served by any
/// number of concurrent workers, and the only coordination points are the
/// store's atomic consume operations.
pub struct AuthorizationServer {
    pub storage: Arc<dyn CredentialStore>,
    scopes: ScopeEvaluator,
    /// Authorization code lifetime
    auth_code_lifetime: Duration,
    /// How long a suspended authorize interaction stays resumable
    pending_lifetime: Duration,
}

/// Outcome of an authorize-endpoint interaction.
#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// No authenticated subject; the caller should send the user to login
    /// and come back with the continuation token.
    RequireLogin { continuation: String },
    /// An explicit user decision is needed before anything is issued.
    ConsentRequired {
        continuation: String,
        client_name: Option<String>,
        scope: Option<String>,
    },
    /// Send the user agent to this URL. Covers code issuance, implicit
    /// token issuance, and the access_denied redirect alike.
    Redirect(String),
}

/// Client credentials presented to the token endpoint.
#[derive(Debug, Clone)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl AuthorizationServer {
    pub fn new(storage: Arc<dyn CredentialStore>) -> Self {
        let scopes = ScopeEvaluator::new(storage.clone());
        Self {
            storage,
            scopes,
            auth_code_lifetime: Duration::minutes(10),
            pending_lifetime: Duration::minutes(15),
        }
    }

    /// Replace the scope evaluator, e.g. to register default-scope resolvers.
    pub fn with_scope_evaluator(mut self, scopes: ScopeEvaluator) -> Self {
        self.scopes = scopes;
        self
    }

    /// Handle an authorize request (RFC 6749 sections 4.1.1, 4.2.1).
    ///
    /// Unknown clients and unregistered redirect URIs are terminal errors,
    /// never redirects, since the supplied redirect URI is unverified at
    /// that point. Past validation, denial and issuance both travel back
    /// through the redirect URI.
    pub async fn begin_authorize(
        &self,
        request: AuthorizationRequest,
        subject: Option<&str>,
    ) -> Result<AuthorizeOutcome, OAuthError> {
        let client = self
            .storage
            .get_client(&request.client_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("unknown client".to_string()))?;

        if !client.redirect_uris.contains(&request.redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "redirect URI is not registered for this client".to_string(),
            ));
        }

        let realm = self.realm_for(&client).await?;
        let grant_type = match request.response_type {
            ResponseType::Code => GrantType::AuthorizationCode,
            ResponseType::Token => GrantType::Implicit,
        };
        if !self
            .storage
            .is_grant_type_allowed(&client.client_id, grant_type)
            .await?
        {
            return Err(OAuthError::UnauthorizedClient(
                "realm does not permit this response type".to_string(),
            ));
        }

        let Some(subject) = subject else {
            let continuation = self.suspend(&request, &realm.id).await?;
            return Ok(AuthorizeOutcome::RequireLogin { continuation });
        };

        if client.automatic_authorization {
            return self.approve(&request, &client, subject).await;
        }

        let continuation = self.suspend(&request, &realm.id).await?;
        Ok(AuthorizeOutcome::ConsentRequired {
            continuation,
            client_name: client.client_name.clone(),
            scope: request.scope.clone(),
        })
    }

    /// Resume a suspended authorize interaction with the user's decision.
    ///
    /// The continuation is consumed exactly once; replaying it fails. The
    /// client and redirect URI are re-checked for consistency, but the rest
    /// of the stored request is trusted as-is.
    pub async fn resume_authorize(
        &self,
        continuation: &str,
        subject: &str,
        approved: bool,
    ) -> Result<AuthorizeOutcome, OAuthError> {
        let pending = self
            .storage
            .consume_pending(continuation)
            .await?
            .ok_or_else(|| {
                OAuthError::InvalidRequest(
                    "unknown or expired authorization request".to_string(),
                )
            })?;

        let request = pending.request;
        let client = self
            .storage
            .get_client(&request.client_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("unknown client".to_string()))?;
        if !client.redirect_uris.contains(&request.redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "redirect URI is not registered for this client".to_string(),
            ));
        }

        if !approved {
            let denied = OAuthError::AccessDenied("resource owner denied the request".to_string());
            let url = error_redirect(
                &request.redirect_uri,
                &denied,
                request.state.as_deref(),
                request.response_type == ResponseType::Token,
            )?;
            return Ok(AuthorizeOutcome::Redirect(url));
        }

        self.approve(&request, &client, subject).await
    }

    /// Issue the approved credential: an authorization code for
    /// `response_type=code`, an access token in the fragment for
    /// `response_type=token`.
    async fn approve(
        &self,
        request: &AuthorizationRequest,
        client: &Client,
        subject: &str,
    ) -> Result<AuthorizeOutcome, OAuthError> {
        let realm = self.realm_for(client).await?;
        // Past redirect-URI validation an unacceptable scope travels back
        // to the client (RFC 6749 section 4.1.2.1), not to the user agent
        // as a terminal error.
        let scope = match self
            .resolve_granted_scope(request.scope.as_deref(), client, &realm, true)
            .await
        {
            Ok(scope) => scope,
            Err(err @ OAuthError::InvalidScope(_)) => {
                let url = error_redirect(
                    &request.redirect_uri,
                    &err,
                    request.state.as_deref(),
                    request.response_type == ResponseType::Token,
                )?;
                return Ok(AuthorizeOutcome::Redirect(url));
            }
            Err(err) => return Err(err),
        };

        match request.response_type {
            ResponseType::Code => {
                let code = generate_token();
                let now = Utc::now();
                self.storage
                    .put_code(&AuthorizationCode {
                        code: code.clone(),
                        client_id: client.client_id.clone(),
                        subject: subject.to_string(),
                        redirect_uri: request.redirect_uri.clone(),
                        scope: scope.clone(),
                        realm_id: realm.id.clone(),
                        created_at: now,
                        expires_at: now + self.auth_code_lifetime,
                    })
                    .await?;

                let mut url = parse_redirect(&request.redirect_uri)?;
                {
                    let mut pairs = url.query_pairs_mut();
                    pairs.append_pair("code", &code);
                    if let Some(state) = &request.state {
                        pairs.append_pair("state", state);
                    }
                }
                Ok(AuthorizeOutcome::Redirect(url.to_string()))
            }
            ResponseType::Token => {
                // Implicit issuance: token in the fragment, never a refresh
                // token.
                let (token, expires_in) = self
                    .mint_access_token(client, &realm, Some(subject), scope.clone())
                    .await?;

                let mut fragment = url::form_urlencoded::Serializer::new(String::new());
                fragment.append_pair("access_token", &token);
                fragment.append_pair("token_type", "bearer");
                fragment.append_pair("expires_in", &expires_in.to_string());
                if let Some(scope) = &scope {
                    fragment.append_pair("scope", scope);
                }
                if let Some(state) = &request.state {
                    fragment.append_pair("state", state);
                }

                let mut url = parse_redirect(&request.redirect_uri)?;
                url.set_fragment(Some(&fragment.finish()));
                Ok(AuthorizeOutcome::Redirect(url.to_string()))
            }
        }
    }

    /// Handle a token request (RFC 6749 section 3.2). Dispatches purely on
    /// the grant type; the response is a token payload or a structured
    /// error, never a redirect.
    pub async fn token(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<TokenResponse, OAuthError> {
        let client_auth = client_auth.or_else(|| {
            request.client_id.clone().map(|client_id| ClientAuthentication {
                client_id,
                client_secret: request.client_secret.clone(),
            })
        });
        let client = self.authenticate_client(client_auth.as_ref()).await?;

        if !self
            .storage
            .is_grant_type_allowed(&client.client_id, request.grant_type)
            .await?
        {
            return Err(OAuthError::UnauthorizedClient(
                "realm does not permit this grant type".to_string(),
            ));
        }

        match request.grant_type {
            GrantType::AuthorizationCode => {
                self.handle_authorization_code_grant(request, client).await
            }
            GrantType::ClientCredentials => {
                self.handle_client_credentials_grant(request, client).await
            }
            GrantType::RefreshToken => self.handle_refresh_token_grant(request, client).await,
            GrantType::Password => self.handle_password_grant(request, client).await,
            // Parsing rejects this earlier; the implicit flow has no
            // token-endpoint leg.
            GrantType::Implicit => Err(OAuthError::UnsupportedGrantType(
                "implicit".to_string(),
            )),
        }
    }

    /// Handle the authorization_code grant (RFC 6749 section 4.1.3)
    async fn handle_authorization_code_grant(
        &self,
        request: TokenRequest,
        client: Client,
    ) -> Result<TokenResponse, OAuthError> {
        let code = request
            .code
            .as_ref()
            .ok_or_else(|| OAuthError::InvalidRequest("missing code".to_string()))?;
        let redirect_uri = request
            .redirect_uri
            .as_ref()
            .ok_or_else(|| OAuthError::InvalidRequest("missing redirect_uri".to_string()))?;

        // Consumption is the commit point: of two concurrent exchanges for
        // the same code, exactly one gets the record. Not-found, expired,
        // and already-used all collapse into the same invalid_grant.
        let auth_code = self
            .storage
            .consume_code(code)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("invalid authorization code".to_string()))?;

        // Expired counts as absent no matter what the store handed back
        if auth_code.expires_at <= Utc::now() {
            return Err(OAuthError::InvalidGrant(
                "invalid authorization code".to_string(),
            ));
        }
        if auth_code.client_id != client.client_id {
            return Err(OAuthError::InvalidGrant(
                "code was issued to a different client".to_string(),
            ));
        }
        if auth_code.redirect_uri != *redirect_uri {
            return Err(OAuthError::InvalidGrant("redirect URI mismatch".to_string()));
        }

        let realm = self.realm_for(&client).await?;
        let (access_token, expires_in) = self
            .mint_access_token(
                &client,
                &realm,
                Some(&auth_code.subject),
                auth_code.scope.clone(),
            )
            .await?;

        let refresh_token = if realm.grant_types.contains(&GrantType::RefreshToken) {
            Some(
                self.mint_refresh_token(
                    &client,
                    &realm,
                    Some(&auth_code.subject),
                    auth_code.scope.clone(),
                )
                .await?,
            )
        } else {
            None
        };

        Ok(TokenResponse::new(
            access_token,
            expires_in,
            refresh_token,
            auth_code.scope,
        ))
    }

    /// Handle the client_credentials grant (RFC 6749 section 4.4)
    async fn handle_client_credentials_grant(
        &self,
        request: TokenRequest,
        client: Client,
    ) -> Result<TokenResponse, OAuthError> {
        let realm = self.realm_for(&client).await?;
        // A request without scope gets an empty grant here, not the client's
        // full allowance.
        let scope = self
            .resolve_granted_scope(request.scope.as_deref(), &client, &realm, false)
            .await?;

        let (access_token, expires_in) = self
            .mint_access_token(&client, &realm, None, scope.clone())
            .await?;

        // RFC 6749 section 4.4.3: no refresh token, unless the realm opts in
        let refresh_token = if realm.issue_refresh_on_client_credentials {
            Some(
                self.mint_refresh_token(&client, &realm, None, scope.clone())
                    .await?,
            )
        } else {
            None
        };

        Ok(TokenResponse::new(
            access_token,
            expires_in,
            refresh_token,
            scope,
        ))
    }

    /// Handle the refresh_token grant (RFC 6749 section 6)
    async fn handle_refresh_token_grant(
        &self,
        request: TokenRequest,
        client: Client,
    ) -> Result<TokenResponse, OAuthError> {
        let supplied = request
            .refresh_token
            .as_ref()
            .ok_or_else(|| OAuthError::InvalidRequest("missing refresh_token".to_string()))?;

        // Atomic take; two concurrent redemptions can never both pass this
        // point with the same record.
        let record = self
            .storage
            .consume_refresh_token(supplied)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("invalid refresh token".to_string()))?;

        // Expired counts as absent no matter what the store handed back
        if record.expires_at <= Utc::now() {
            return Err(OAuthError::InvalidGrant("invalid refresh token".to_string()));
        }
        if record.client_id != client.client_id {
            return Err(OAuthError::InvalidGrant(
                "refresh token was issued to a different client".to_string(),
            ));
        }

        // Scope may only narrow relative to the original grant
        let granted = match request.scope.as_deref() {
            Some(requested) if !requested.trim().is_empty() => {
                let required = parse_scope(requested);
                let original = Available::granted(record.scope.as_deref().unwrap_or(""));
                if !self.scopes.check_scope(&required, &original).await? {
                    return Err(OAuthError::InvalidScope(
                        "requested scope exceeds the original grant".to_string(),
                    ));
                }
                Some(join_scopes(&required))
            }
            _ => record.scope.clone(),
        };

        let realm = self.realm_for(&client).await?;
        let (access_token, expires_in) = self
            .mint_access_token(&client, &realm, record.subject.as_deref(), granted.clone())
            .await?;

        let refresh_token = match realm.refresh_rotation {
            RefreshRotation::Rotate => {
                self.mint_refresh_token(&client, &realm, record.subject.as_deref(), record.scope.clone())
                    .await?
            }
            RefreshRotation::KeepOriginal => {
                // Put the consumed record back; its value stays valid.
                self.storage.put_refresh_token(&record).await?;
                record.token.clone()
            }
        };

        Ok(TokenResponse::new(
            access_token,
            expires_in,
            Some(refresh_token),
            granted,
        ))
    }

    /// Handle the resource-owner password grant (RFC 6749 section 4.3)
    async fn handle_password_grant(
        &self,
        request: TokenRequest,
        client: Client,
    ) -> Result<TokenResponse, OAuthError> {
        let username = request
            .username
            .as_ref()
            .ok_or_else(|| OAuthError::InvalidRequest("missing username".to_string()))?;
        let password = request
            .password
            .as_ref()
            .ok_or_else(|| OAuthError::InvalidRequest("missing password".to_string()))?;

        if !self
            .storage
            .verify_resource_owner_credentials(username, password)
            .await?
        {
            return Err(OAuthError::InvalidGrant(
                "resource owner credentials are invalid".to_string(),
            ));
        }
        let subject = self
            .storage
            .get_subject_id(username)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant(
                "resource owner credentials are invalid".to_string(),
            ))?;

        let realm = self.realm_for(&client).await?;
        let scope = self
            .resolve_granted_scope(request.scope.as_deref(), &client, &realm, true)
            .await?;

        let (access_token, expires_in) = self
            .mint_access_token(&client, &realm, Some(&subject), scope.clone())
            .await?;
        let refresh_token = if realm.grant_types.contains(&GrantType::RefreshToken) {
            Some(
                self.mint_refresh_token(&client, &realm, Some(&subject), scope.clone())
                    .await?,
            )
        } else {
            None
        };

        Ok(TokenResponse::new(
            access_token,
            expires_in,
            refresh_token,
            scope,
        ))
    }

    /// Resolve the presented credentials to an authenticated client.
    async fn authenticate_client(
        &self,
        client_auth: Option<&ClientAuthentication>,
    ) -> Result<Client, OAuthError> {
        let auth = client_auth.ok_or_else(|| {
            OAuthError::InvalidClient("client authentication required".to_string())
        })?;

        let client = self
            .storage
            .get_client(&auth.client_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("unknown client".to_string()))?;

        if !self
            .storage
            .verify_client_secret(&auth.client_id, auth.client_secret.as_deref())
            .await?
        {
            return Err(OAuthError::InvalidClient(
                "client authentication failed".to_string(),
            ));
        }

        Ok(client)
    }

    /// Validate a requested scope against the client's allowance and the
    /// realm catalogue, or fall back when none was requested.
    async fn resolve_granted_scope(
        &self,
        requested: Option<&str>,
        client: &Client,
        realm: &Realm,
        fall_back_to_default: bool,
    ) -> Result<Option<String>, OAuthError> {
        match requested {
            Some(raw) if !raw.trim().is_empty() => {
                let required = parse_scope(raw);
                if let Some(allowed) = client.allowed_scope.as_deref() {
                    if !self
                        .scopes
                        .check_scope(&required, &Available::granted(allowed))
                        .await?
                    {
                        return Err(OAuthError::InvalidScope(
                            "requested scope exceeds the client's allowance".to_string(),
                        ));
                    }
                }
                if !self
                    .scopes
                    .check_scope(
                        &required,
                        &Available::Catalogue {
                            realm_id: realm.id.clone(),
                        },
                    )
                    .await?
                {
                    return Err(OAuthError::InvalidScope(
                        "requested scope is not defined for this realm".to_string(),
                    ));
                }
                if !self.scopes.check_access(&required, realm, client).await? {
                    return Err(OAuthError::InvalidScope(
                        "requested scope is not available to this client".to_string(),
                    ));
                }
                Ok(Some(join_scopes(&required)))
            }
            _ if fall_back_to_default => self.scopes.default_scope(realm, client).await,
            _ => Ok(None),
        }
    }

    async fn mint_access_token(
        &self,
        client: &Client,
        realm: &Realm,
        subject: Option<&str>,
        scope: Option<String>,
    ) -> Result<(String, u64), OAuthError> {
        let token = generate_token();
        let now = Utc::now();
        self.storage
            .put_access_token(&AccessToken {
                token: token.clone(),
                token_type: TokenType::Bearer,
                client_id: client.client_id.clone(),
                subject: subject.map(|s| s.to_string()),
                scope,
                realm_id: realm.id.clone(),
                created_at: now,
                expires_at: now + realm.access_token_lifetime,
            })
            .await?;
        Ok((token, realm.access_token_lifetime.num_seconds() as u64))
    }

    async fn mint_refresh_token(
        &self,
        client: &Client,
        realm: &Realm,
        subject: Option<&str>,
        scope: Option<String>,
    ) -> Result<String, OAuthError> {
        let token = generate_token();
        let now = Utc::now();
        self.storage
            .put_refresh_token(&RefreshToken {
                token: token.clone(),
                client_id: client.client_id.clone(),
                subject: subject.map(|s| s.to_string()),
                scope,
                realm_id: realm.id.clone(),
                created_at: now,
                expires_at: now + realm.refresh_token_lifetime,
            })
            .await?;
        Ok(token)
    }

    async fn suspend(
        &self,
        request: &AuthorizationRequest,
        realm_id: &str,
    ) -> Result<String, OAuthError> {
        let continuation = generate_token();
        let now = Utc::now();
        self.storage
            .put_pending(&PendingAuthorization {
                continuation: continuation.clone(),
                request: request.clone(),
                realm_id: realm_id.to_string(),
                created_at: now,
                expires_at: now + self.pending_lifetime,
            })
            .await?;
        Ok(continuation)
    }

    async fn realm_for(&self, client: &Client) -> Result<Realm, OAuthError> {
        match self.storage.get_realm(&client.realm_id).await? {
            Some(realm) => Ok(realm),
            None => {
                tracing::error!(
                    client_id = %client.client_id,
                    realm_id = %client.realm_id,
                    "client references a missing realm"
                );
                Err(OAuthError::ServerError("missing realm".to_string()))
            }
        }
    }
}

fn parse_redirect(redirect_uri: &str) -> Result<Url, OAuthError> {
    Url::parse(redirect_uri)
        .map_err(|e| OAuthError::InvalidRequest(format!("invalid redirect URI: {}", e)))
}

/// Build an error redirect carrying `error`, `error_description`, and the
/// echoed `state`. Implicit-flow errors travel in the fragment.
pub fn error_redirect(
    redirect_uri: &str,
    err: &OAuthError,
    state: Option<&str>,
    fragment: bool,
) -> Result<String, OAuthError> {
    let mut url = parse_redirect(redirect_uri)?;
    if fragment {
        let mut pairs = url::form_urlencoded::Serializer::new(String::new());
        pairs.append_pair("error", err.error_code());
        pairs.append_pair("error_description", &err.public_description());
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
        url.set_fragment(Some(&pairs.finish()));
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("error", err.error_code());
        pairs.append_pair("error_description", &err.public_description());
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    Ok(url.to_string())
}

/// Extract client credentials from the Authorization header (Basic) or the
/// form body. The header wins when both are present.
pub fn extract_client_auth(
    headers: &HeaderMap,
    form: &TokenForm,
) -> Result<Option<ClientAuthentication>, OAuthError> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| OAuthError::InvalidRequest("malformed Authorization header".to_string()))?;
        if let Some(encoded) = value.strip_prefix("Basic ") {
            let decoded = BASE64_STANDARD.decode(encoded.trim()).map_err(|_| {
                OAuthError::InvalidClient("malformed Basic credentials".to_string())
            })?;
            let decoded = String::from_utf8(decoded).map_err(|_| {
                OAuthError::InvalidClient("malformed Basic credentials".to_string())
            })?;
            let (client_id, client_secret) = decoded.split_once(':').ok_or_else(|| {
                OAuthError::InvalidClient("malformed Basic credentials".to_string())
            })?;
            return Ok(Some(ClientAuthentication {
                client_id: client_id.to_string(),
                client_secret: if client_secret.is_empty() {
                    None
                } else {
                    Some(client_secret.to_string())
                },
            }));
        }
    }

    if let Some(client_id) = &form.client_id {
        return Ok(Some(ClientAuthentication {
            client_id: client_id.clone(),
            client_secret: form.client_secret.clone(),
        }));
    }

    Ok(None)
}
