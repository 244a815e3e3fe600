//! In-memory credential store.
//!
//! Reference implementation of the storage traits, used in tests and for
//! single-process deployments.

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

pub type Result<T> = std::result::Result<T, StorageError>;

/// In-memory implementation of [`CredentialStore`].
///
/// Each table sits behind its own mutex; consume operations hold the lock
/// across the check and the removal, which is what makes code redemption and
/// refresh rotation exactly-once under concurrency.
#[derive(Default)]
pub struct MemoryCredentialStore {
    realms: Mutex<HashMap<String, Realm>>,
    clients: Mutex<HashMap<String, Client>>,
    scopes: Mutex<HashMap<String, ScopeDef>>, // "realm_id:name" -> scope
    auth_codes: Mutex<HashMap<String, AuthorizationCode>>,
    access_tokens: Mutex<HashMap<String, AccessToken>>,
    refresh_tokens: Mutex<HashMap<String, RefreshToken>>,
    resource_owners: Mutex<HashMap<String, ResourceOwner>>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope_key(realm_id: &str, name: &str) -> String {
        format!("{}:{}", realm_id, name)
    }

    fn lock<'a, T>(table: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
        table
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

#[async_trait]
impl RealmStore for MemoryCredentialStore {
    async fn put_realm(&self, realm: &Realm) -> Result<()> {
        let mut realms = Self::lock(&self.realms)?;
        realms.insert(realm.id.clone(), realm.clone());
        Ok(())
    }

    async fn get_realm(&self, realm_id: &str) -> Result<Option<Realm>> {
        let realms = Self::lock(&self.realms)?;
        Ok(realms.get(realm_id).cloned())
    }
}

#[async_trait]
impl ClientStore for MemoryCredentialStore {
    async fn put_client(&self, client: &Client) -> Result<()> {
        let mut clients = Self::lock(&self.clients)?;
        clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        let clients = Self::lock(&self.clients)?;
        Ok(clients.get(client_id).cloned())
    }

    async fn verify_client_secret(&self, client_id: &str, supplied: Option<&str>) -> Result<bool> {
        let client = match self.get_client(client_id).await? {
            Some(client) => client,
            None => return Ok(false),
        };

        if !client.require_secret {
            return Ok(true);
        }

        let digest = match client.secret_digest {
            Some(digest) => digest,
            None => return Ok(false),
        };

        match supplied {
            Some(supplied) if !supplied.is_empty() => {
                Ok(verify_secret_digest(&digest, supplied))
            }
            _ => Ok(false),
        }
    }

    async fn is_grant_type_allowed(&self, client_id: &str, grant_type: GrantType) -> Result<bool> {
        let client = match self.get_client(client_id).await? {
            Some(client) => client,
            None => return Ok(false),
        };
        let realm = match self.get_realm(&client.realm_id).await? {
            Some(realm) => realm,
            None => return Ok(false),
        };

        if grant_type == GrantType::Implicit {
            return Ok(realm.allow_implicit);
        }
        Ok(realm.grant_types.contains(&grant_type))
    }
}

#[async_trait]
impl ScopeStore for MemoryCredentialStore {
    async fn put_scope(&self, scope: &ScopeDef) -> Result<()> {
        let mut scopes = Self::lock(&self.scopes)?;
        scopes.insert(Self::scope_key(&scope.realm_id, &scope.name), scope.clone());
        Ok(())
    }

    async fn get_scope(&self, realm_id: &str, name: &str) -> Result<Option<ScopeDef>> {
        let scopes = Self::lock(&self.scopes)?;
        Ok(scopes.get(&Self::scope_key(realm_id, name)).cloned())
    }

    async fn get_scopes(&self, realm_id: &str, names: &BTreeSet<String>) -> Result<Vec<ScopeDef>> {
        let scopes = Self::lock(&self.scopes)?;
        Ok(names
            .iter()
            .filter_map(|name| scopes.get(&Self::scope_key(realm_id, name)).cloned())
            .collect())
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryCredentialStore {
    async fn put_code(&self, code: &AuthorizationCode) -> Result<()> {
        let mut codes = Self::lock(&self.auth_codes)?;
        codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        let codes = Self::lock(&self.auth_codes)?;
        Ok(codes.get(code).cloned())
    }

    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        let mut codes = Self::lock(&self.auth_codes)?;
        // Remove under the lock: concurrent redemptions see the entry once.
        match codes.remove(code) {
            Some(record) if record.expires_at > Utc::now() => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    async fn cleanup_expired_codes(&self) -> Result<usize> {
        let mut codes = Self::lock(&self.auth_codes)?;
        let now = Utc::now();
        let initial = codes.len();
        codes.retain(|_, code| code.expires_at > now);
        Ok(initial - codes.len())
    }
}

#[async_trait]
impl AccessTokenStore for MemoryCredentialStore {
    async fn put_access_token(&self, token: &AccessToken) -> Result<()> {
        let mut tokens = Self::lock(&self.access_tokens)?;
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        let tokens = Self::lock(&self.access_tokens)?;
        Ok(tokens.get(token).cloned())
    }

    async fn revoke_access_token(&self, token: &str) -> Result<()> {
        let mut tokens = Self::lock(&self.access_tokens)?;
        tokens.remove(token);
        Ok(())
    }

    async fn cleanup_expired_tokens(&self) -> Result<usize> {
        let mut tokens = Self::lock(&self.access_tokens)?;
        let now = Utc::now();
        let initial = tokens.len();
        tokens.retain(|_, token| token.expires_at > now);
        Ok(initial - tokens.len())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryCredentialStore {
    async fn put_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        let mut tokens = Self::lock(&self.refresh_tokens)?;
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let tokens = Self::lock(&self.refresh_tokens)?;
        Ok(tokens.get(token).cloned())
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let mut tokens = Self::lock(&self.refresh_tokens)?;
        match tokens.remove(token) {
            Some(record) if record.expires_at > Utc::now() => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<()> {
        let mut tokens = Self::lock(&self.refresh_tokens)?;
        tokens.remove(token);
        Ok(())
    }

    async fn cleanup_expired_refresh_tokens(&self) -> Result<usize> {
        let mut tokens = Self::lock(&self.refresh_tokens)?;
        let now = Utc::now();
        let initial = tokens.len();
        tokens.retain(|_, token| token.expires_at > now);
        Ok(initial - tokens.len())
    }
}

#[async_trait]
impl ResourceOwnerStore for MemoryCredentialStore {
    async fn put_resource_owner(&self, owner: &ResourceOwner) -> Result<()> {
        let mut owners = Self::lock(&self.resource_owners)?;
        owners.insert(owner.username.clone(), owner.clone());
        Ok(())
    }

    async fn verify_resource_owner_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool> {
        let owners = Self::lock(&self.resource_owners)?;
        match owners.get(username) {
            Some(owner) => Ok(verify_secret_digest(&owner.password_digest, password)),
            None => Ok(false),
        }
    }

    async fn get_subject_id(&self, username: &str) -> Result<Option<String>> {
        let owners = Self::lock(&self.resource_owners)?;
        Ok(owners.get(username).map(|owner| owner.subject_id.clone()))
    }
}

#[async_trait]
impl PendingAuthorizationStore for MemoryCredentialStore {
    async fn put_pending(&self, pending: &PendingAuthorization) -> Result<()> {
        let mut table = Self::lock(&self.pending)?;
        table.insert(pending.continuation.clone(), pending.clone());
        Ok(())
    }

    async fn consume_pending(&self, continuation: &str) -> Result<Option<PendingAuthorization>> {
        let mut table = Self::lock(&self.pending)?;
        match table.remove(continuation) {
            Some(record) if record.expires_at > Utc::now() => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    async fn cleanup_expired_pending(&self) -> Result<usize> {
        let mut table = Self::lock(&self.pending)?;
        let now = Utc::now();
        let initial = table.len();
        table.retain(|_, pending| pending.expires_at > now);
        Ok(initial - table.len())
    }
}

impl CredentialStore for MemoryCredentialStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn test_realm() -> Realm {
        Realm {
            id: "main".to_string(),
            name: "Main realm".to_string(),
            default_scope: Some("basic".to_string()),
            grant_types: HashSet::from([
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
            ]),
            allow_implicit: false,
            access_token_lifetime: Duration::hours(1),
            refresh_token_lifetime: Duration::days(14),
            refresh_rotation: RefreshRotation::Rotate,
            issue_refresh_on_client_credentials: false,
        }
    }

    fn test_client() -> Client {
        Client {
            client_id: "c1".to_string(),
            client_name: Some("Test client".to_string()),
            secret_digest: Some(hash_secret("s1")),
            require_secret: true,
            redirect_uris: vec!["https://app/cb".to_string()],
            allowed_scope: Some("read write".to_string()),
            automatic_authorization: false,
            realm_id: "main".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_authorization_code_consumed_exactly_once() {
        let store = MemoryCredentialStore::new();
        let code = AuthorizationCode {
            code: "abc123".to_string(),
            client_id: "c1".to_string(),
            subject: "u1".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            scope: Some("read".to_string()),
            realm_id: "main".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::seconds(600),
        };

        store.put_code(&code).await.unwrap();
        assert!(store.consume_code("abc123").await.unwrap().is_some());
        assert!(store.consume_code("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_code_redemption_single_winner() {
        let store = Arc::new(MemoryCredentialStore::new());
        let code = AuthorizationCode {
            code: "raced".to_string(),
            client_id: "c1".to_string(),
            subject: "u1".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            scope: None,
            realm_id: "main".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::seconds(600),
        };
        store.put_code(&code).await.unwrap();

        let attempts = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.consume_code("raced").await.unwrap() })
        });
        let results = futures::future::join_all(attempts).await;
        let winners = results
            .into_iter()
            .filter(|r| r.as_ref().unwrap().is_some())
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_code_not_redeemable() {
        let store = MemoryCredentialStore::new();
        let code = AuthorizationCode {
            code: "stale".to_string(),
            client_id: "c1".to_string(),
            subject: "u1".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            scope: None,
            realm_id: "main".to_string(),
            created_at: Utc::now() - Duration::minutes(20),
            expires_at: Utc::now() - Duration::minutes(10),
        };
        store.put_code(&code).await.unwrap();
        assert!(store.consume_code("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_code_idempotent_overwrites() {
        let store = MemoryCredentialStore::new();
        let mut code = AuthorizationCode {
            code: "again".to_string(),
            client_id: "c1".to_string(),
            subject: "u1".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            scope: Some("read".to_string()),
            realm_id: "main".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::seconds(60),
        };
        store.put_code(&code).await.unwrap();

        code.scope = Some("read write".to_string());
        code.expires_at = Utc::now() + Duration::seconds(600);
        store.put_code(&code).await.unwrap();

        let stored = store.get_code("again").await.unwrap().unwrap();
        assert_eq!(stored.scope, Some("read write".to_string()));
    }

    #[tokio::test]
    async fn test_client_secret_verification() {
        let store = MemoryCredentialStore::new();
        store.put_client(&test_client()).await.unwrap();

        assert!(store.verify_client_secret("c1", Some("s1")).await.unwrap());
        assert!(!store.verify_client_secret("c1", Some("wrong")).await.unwrap());
        assert!(!store.verify_client_secret("c1", None).await.unwrap());
        assert!(!store.verify_client_secret("c1", Some("")).await.unwrap());
        assert!(!store.verify_client_secret("ghost", Some("s1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_public_client_accepts_missing_secret() {
        let store = MemoryCredentialStore::new();
        let mut client = test_client();
        client.client_id = "pub".to_string();
        client.secret_digest = None;
        client.require_secret = false;
        store.put_client(&client).await.unwrap();

        assert!(store.verify_client_secret("pub", None).await.unwrap());
        assert!(store.verify_client_secret("pub", Some("")).await.unwrap());
    }

    #[tokio::test]
    async fn test_grant_type_allowed_at_realm_level() {
        let store = MemoryCredentialStore::new();
        store.put_realm(&test_realm()).await.unwrap();
        store.put_client(&test_client()).await.unwrap();

        assert!(
            store
                .is_grant_type_allowed("c1", GrantType::AuthorizationCode)
                .await
                .unwrap()
        );
        assert!(
            !store
                .is_grant_type_allowed("c1", GrantType::ClientCredentials)
                .await
                .unwrap()
        );
        // Implicit rides on the realm toggle, not the grant-type list
        assert!(
            !store
                .is_grant_type_allowed("c1", GrantType::Implicit)
                .await
                .unwrap()
        );

        let mut realm = test_realm();
        realm.allow_implicit = true;
        store.put_realm(&realm).await.unwrap();
        assert!(
            store
                .is_grant_type_allowed("c1", GrantType::Implicit)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_scope_catalogue_lookup() {
        let store = MemoryCredentialStore::new();
        for name in ["read", "write"] {
            store
                .put_scope(&ScopeDef {
                    name: name.to_string(),
                    description: format!("{} access", name),
                    realm_id: "main".to_string(),
                })
                .await
                .unwrap();
        }

        let names = parse_scope("read write missing");
        let found = store.get_scopes("main", &names).await.unwrap();
        assert_eq!(found.len(), 2);

        // Scopes belong to exactly one realm
        assert!(store.get_scope("other", "read").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_consume_exactly_once() {
        let store = MemoryCredentialStore::new();
        let token = RefreshToken {
            token: "r1".to_string(),
            client_id: "c1".to_string(),
            subject: Some("u1".to_string()),
            scope: Some("read".to_string()),
            realm_id: "main".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(14),
        };
        store.put_refresh_token(&token).await.unwrap();

        assert!(store.consume_refresh_token("r1").await.unwrap().is_some());
        assert!(store.consume_refresh_token("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resource_owner_credentials() {
        let store = MemoryCredentialStore::new();
        store
            .put_resource_owner(&ResourceOwner {
                username: "alice".to_string(),
                password_digest: hash_secret("hunter2"),
                subject_id: "42".to_string(),
            })
            .await
            .unwrap();

        assert!(
            store
                .verify_resource_owner_credentials("alice", "hunter2")
                .await
                .unwrap()
        );
        assert!(
            !store
                .verify_resource_owner_credentials("alice", "nope")
                .await
                .unwrap()
        );
        assert!(
            !store
                .verify_resource_owner_credentials("bob", "hunter2")
                .await
                .unwrap()
        );
        assert_eq!(
            store.get_subject_id("alice").await.unwrap(),
            Some("42".to_string())
        );
        assert_eq!(store.get_subject_id("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_authorization_consume_once_and_ttl() {
        let store = MemoryCredentialStore::new();
        let pending = PendingAuthorization {
            continuation: "cont1".to_string(),
            request: AuthorizationRequest {
                response_type: ResponseType::Code,
                client_id: "c1".to_string(),
                redirect_uri: "https://app/cb".to_string(),
                scope: Some("read".to_string()),
                state: Some("xyz".to_string()),
            },
            realm_id: "main".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(5),
        };
        store.put_pending(&pending).await.unwrap();

        assert!(store.consume_pending("cont1").await.unwrap().is_some());
        assert!(store.consume_pending("cont1").await.unwrap().is_none());

        let mut stale = pending.clone();
        stale.continuation = "cont2".to_string();
        stale.expires_at = Utc::now() - Duration::minutes(1);
        store.put_pending(&stale).await.unwrap();
        assert!(store.consume_pending("cont2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = MemoryCredentialStore::new();
        let now = Utc::now();
        for (value, offset) in [("live", Duration::hours(1)), ("dead", -Duration::hours(1))] {
            store
                .put_access_token(&AccessToken {
                    token: value.to_string(),
                    token_type: TokenType::Bearer,
                    client_id: "c1".to_string(),
                    subject: None,
                    scope: None,
                    realm_id: "main".to_string(),
                    created_at: now,
                    expires_at: now + offset,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.cleanup_expired_tokens().await.unwrap(), 1);
        assert!(store.get_access_token("live").await.unwrap().is_some());
        assert!(store.get_access_token("dead").await.unwrap().is_none());
    }
}
