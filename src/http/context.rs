//! Application state shared across request handlers.

use std::sync::Arc;

use crate::config::Config;
use crate::oauth::auth_server::AuthorizationServer;
use crate::oauth::resource_server::ResourceAuthenticator;
use crate::storage::CredentialStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Credential storage for realms, clients, codes, and tokens
    pub storage: Arc<dyn CredentialStore>,
    /// The protocol engine behind the authorize and token endpoints
    pub auth_server: Arc<AuthorizationServer>,
    /// Bearer-token resolution for protected routes
    pub authenticator: Arc<ResourceAuthenticator>,
}

impl AppState {
    pub fn new(config: Arc<Config>, storage: Arc<dyn CredentialStore>) -> Self {
        let auth_server = Arc::new(AuthorizationServer::new(storage.clone()));
        let authenticator = Arc::new(ResourceAuthenticator::new(storage.clone()));
        Self {
            config,
            storage,
            auth_server,
            authenticator,
        }
    }
}
