//! OAuth2 authorization server binary.
//!
//! Wires the protocol engine to the in-memory credential store, optionally
//! seeds it from a JSON file, and runs the HTTP server with graceful
//! shutdown.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use oauthd::{
    config::Config,
    errors::ConfigError,
    http::{AppState, build_router},
    oauth::types::{Client, GrantType, Realm, RefreshRotation, ScopeDef, hash_secret},
    storage::{CredentialStore, MemoryCredentialStore, ResourceOwner},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "oauthd", version, about = "OAuth2 authorization server")]
struct Args {
    /// Path to a JSON seed file, overriding OAUTHD_SEED
    #[arg(long)]
    seed: Option<String>,
}

/// Seed-file shape. Durations are given in seconds; omitted lifetimes fall
/// back to the configured defaults.
#[derive(Deserialize)]
struct Seed {
    #[serde(default)]
    realms: Vec<SeedRealm>,
    #[serde(default)]
    clients: Vec<SeedClient>,
    #[serde(default)]
    scopes: Vec<SeedScope>,
    #[serde(default)]
    users: Vec<SeedUser>,
}

#[derive(Deserialize)]
struct SeedRealm {
    id: String,
    name: String,
    default_scope: Option<String>,
    grant_types: Vec<GrantType>,
    #[serde(default)]
    allow_implicit: bool,
    access_token_lifetime_secs: Option<i64>,
    refresh_token_lifetime_secs: Option<i64>,
    #[serde(default)]
    rotate_refresh_tokens: bool,
    #[serde(default)]
    issue_refresh_on_client_credentials: bool,
}

#[derive(Deserialize)]
struct SeedClient {
    client_id: String,
    client_name: Option<String>,
    /// Plaintext here only; stored as a SHA-256 digest
    client_secret: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
    allowed_scope: Option<String>,
    #[serde(default)]
    automatic_authorization: bool,
    realm_id: String,
}

#[derive(Deserialize)]
struct SeedScope {
    name: String,
    description: String,
    realm_id: String,
}

#[derive(Deserialize)]
struct SeedUser {
    username: String,
    password: String,
    subject_id: String,
}

async fn load_seed(path: &str, config: &Config, storage: &dyn CredentialStore) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::SeedLoadFailed(path.to_string(), e.to_string()))?;
    let seed: Seed = serde_json::from_str(&raw)
        .map_err(|e| ConfigError::SeedLoadFailed(path.to_string(), e.to_string()))?;

    for realm in seed.realms {
        let access_lifetime = realm
            .access_token_lifetime_secs
            .map(chrono::Duration::seconds)
            .unwrap_or(*config.default_access_token_lifetime.as_ref());
        let refresh_lifetime = realm
            .refresh_token_lifetime_secs
            .map(chrono::Duration::seconds)
            .unwrap_or(*config.default_refresh_token_lifetime.as_ref());
        storage
            .put_realm(&Realm {
                id: realm.id,
                name: realm.name,
                default_scope: realm.default_scope,
                grant_types: realm.grant_types.into_iter().collect(),
                allow_implicit: realm.allow_implicit,
                access_token_lifetime: access_lifetime,
                refresh_token_lifetime: refresh_lifetime,
                refresh_rotation: if realm.rotate_refresh_tokens {
                    RefreshRotation::Rotate
                } else {
                    RefreshRotation::KeepOriginal
                },
                issue_refresh_on_client_credentials: realm.issue_refresh_on_client_credentials,
            })
            .await?;
    }

    for client in seed.clients {
        let now = Utc::now();
        storage
            .put_client(&Client {
                client_id: client.client_id,
                client_name: client.client_name,
                secret_digest: client.client_secret.as_deref().map(hash_secret),
                require_secret: client.client_secret.is_some(),
                redirect_uris: client.redirect_uris,
                allowed_scope: client.allowed_scope,
                automatic_authorization: client.automatic_authorization,
                realm_id: client.realm_id,
                created_at: now,
                updated_at: now,
            })
            .await?;
    }

    for scope in seed.scopes {
        storage
            .put_scope(&ScopeDef {
                name: scope.name,
                description: scope.description,
                realm_id: scope.realm_id,
            })
            .await?;
    }

    for user in seed.users {
        storage
            .put_resource_owner(&ResourceOwner {
                username: user.username,
                password_digest: hash_secret(&user.password),
                subject_id: user.subject_id,
            })
            .await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "oauthd=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let args = Args::parse();
    let version = oauthd::config::version()?;
    tracing::info!(?version, "Starting oauthd");

    let config = Config::new()?;

    let storage: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    if let Some(seed_path) = args.seed.as_deref().or(config.seed_path.as_deref()) {
        tracing::info!(path = %seed_path, "Loading seed file");
        load_seed(seed_path, &config, storage.as_ref()).await?;
    }

    let config = Arc::new(config);
    let app_storage = storage.clone();
    let app_context = AppState::new(config.clone(), storage);
    let app = build_router(app_context);

    // Setup graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    // Start HTTP server
    {
        let http_port = *config.http_port.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let bind_address = format!("0.0.0.0:{http_port}");
            tracing::info!("Starting server on {bind_address}");
            let listener = match TcpListener::bind(&bind_address).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!("failed to bind {bind_address}: {err}");
                    inner_token.cancel();
                    return;
                }
            };

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        () = shutdown_token.cancelled() => { }
                    }
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    // Periodically sweep expired codes, tokens, and pending authorizations
    {
        let storage = app_storage;
        let inner_token = token.clone();
        tracker.spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
            loop {
                tokio::select! {
                    () = inner_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                for result in [
                    storage.cleanup_expired_codes().await,
                    storage.cleanup_expired_tokens().await,
                    storage.cleanup_expired_refresh_tokens().await,
                    storage.cleanup_expired_pending().await,
                ] {
                    match result {
                        Ok(removed) if removed > 0 => {
                            tracing::debug!(removed, "swept expired credentials")
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = ?err, "credential sweep failed"),
                    }
                }
            }
        });
    }

    tracker.wait().await;

    Ok(())
}
