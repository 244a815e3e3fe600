//! Scope evaluation.
//!
//! Subset checks over whitespace-delimited scope strings, with optional
//! resolution against a realm's scope catalogue, and default-scope
//! resolution with pluggable resolvers.

use crate::errors::OAuthError;
use crate::oauth::types::{Client, Realm, ScopeDef, parse_scope};
use crate::storage::CredentialStore;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The set a scope check runs against.
#[derive(Debug, Clone)]
pub enum Available {
    /// An explicit, already-resolved set (e.g. a token's prior grant)
    Granted(BTreeSet<String>),
    /// Resolve the required names against the realm's scope catalogue.
    /// Names without a catalogue entry fail the check.
    Catalogue { realm_id: String },
}

impl Available {
    /// Convenience constructor from a space-delimited grant string.
    pub fn granted(scope: &str) -> Self {
        Available::Granted(parse_scope(scope))
    }
}

/// Pluggable default-scope resolution. Resolvers run in registration order
/// ahead of the realm's configured default; the first to return a non-empty
/// scope wins.
#[async_trait]
pub trait DefaultScopeResolver: Send + Sync {
    async fn resolve(&self, realm: &Realm, client: &Client) -> Result<Option<String>, OAuthError>;
}

/// Pluggable per-scope access control: which principals may request a
/// given catalogue entry. Every registered resolver must permit a scope
/// for it to be grantable; with none registered the whole catalogue is
/// open.
#[async_trait]
pub trait ScopeAccessResolver: Send + Sync {
    async fn permits(
        &self,
        realm: &Realm,
        client: &Client,
        scope: &ScopeDef,
    ) -> Result<bool, OAuthError>;
}

/// Scope subset checks and default-scope resolution against a realm's
/// catalogue.
pub struct ScopeEvaluator {
    store: Arc<dyn CredentialStore>,
    resolvers: Vec<Arc<dyn DefaultScopeResolver>>,
    access_resolvers: Vec<Arc<dyn ScopeAccessResolver>>,
}

impl ScopeEvaluator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            resolvers: Vec::new(),
            access_resolvers: Vec::new(),
        }
    }

    /// Register a default-scope resolver. Order of registration is the
    /// order of consultation.
    pub fn with_resolver(mut self, resolver: Arc<dyn DefaultScopeResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Register a scope-access resolver.
    pub fn with_access_resolver(mut self, resolver: Arc<dyn ScopeAccessResolver>) -> Self {
        self.access_resolvers.push(resolver);
        self
    }

    /// Whether every required scope is covered by `available`.
    ///
    /// The empty required set always passes. Names compare byte-for-byte,
    /// case-sensitive. Against the catalogue, a required name with no
    /// definition fails the whole check.
    pub async fn check_scope(
        &self,
        required: &BTreeSet<String>,
        available: &Available,
    ) -> Result<bool, OAuthError> {
        if required.is_empty() {
            return Ok(true);
        }

        match available {
            Available::Granted(granted) => Ok(required.is_subset(granted)),
            Available::Catalogue { realm_id } => {
                let defined = self.store.get_scopes(realm_id, required).await?;
                Ok(defined.len() == required.len())
            }
        }
    }

    /// Whether the client may be granted every scope in `required`, per
    /// the registered access resolvers.
    ///
    /// Names without a catalogue entry are skipped here; the catalogue
    /// check owns their rejection.
    pub async fn check_access(
        &self,
        required: &BTreeSet<String>,
        realm: &Realm,
        client: &Client,
    ) -> Result<bool, OAuthError> {
        if self.access_resolvers.is_empty() || required.is_empty() {
            return Ok(true);
        }

        for name in required {
            let Some(def) = self.store.get_scope(&realm.id, name).await? else {
                continue;
            };
            for resolver in &self.access_resolvers {
                if !resolver.permits(realm, client, &def).await? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Resolve the scope to apply when a request carries none.
    ///
    /// Consults registered resolvers first, then the realm's configured
    /// default. A configured default naming a scope absent from the
    /// catalogue is treated as no default at all.
    pub async fn default_scope(
        &self,
        realm: &Realm,
        client: &Client,
    ) -> Result<Option<String>, OAuthError> {
        for resolver in &self.resolvers {
            if let Some(scope) = resolver.resolve(realm, client).await? {
                if !scope.trim().is_empty() {
                    return Ok(Some(scope));
                }
            }
        }

        let Some(configured) = realm.default_scope.as_deref() else {
            return Ok(None);
        };
        if configured.trim().is_empty() {
            return Ok(None);
        }

        match self.store.get_scope(&realm.id, configured).await? {
            Some(_) => Ok(Some(configured.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::{GrantType, RefreshRotation, ScopeDef, hash_secret};
    use crate::storage::{MemoryCredentialStore, RealmStore, ScopeStore};
    use chrono::{Duration, Utc};
    use std::collections::HashSet;

    fn realm(default_scope: Option<&str>) -> Realm {
        Realm {
            id: "main".to_string(),
            name: "Main".to_string(),
            default_scope: default_scope.map(|s| s.to_string()),
            grant_types: HashSet::from([GrantType::AuthorizationCode]),
            allow_implicit: false,
            access_token_lifetime: Duration::hours(1),
            refresh_token_lifetime: Duration::days(14),
            refresh_rotation: RefreshRotation::Rotate,
            issue_refresh_on_client_credentials: false,
        }
    }

    fn client() -> Client {
        Client {
            client_id: "c1".to_string(),
            client_name: None,
            secret_digest: Some(hash_secret("s1")),
            require_secret: true,
            redirect_uris: vec!["https://app/cb".to_string()],
            allowed_scope: None,
            automatic_authorization: false,
            realm_id: "main".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn store_with_scopes(names: &[&str]) -> Arc<MemoryCredentialStore> {
        let store = Arc::new(MemoryCredentialStore::new());
        for name in names {
            store
                .put_scope(&ScopeDef {
                    name: name.to_string(),
                    description: format!("{} access", name),
                    realm_id: "main".to_string(),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_empty_required_always_passes() {
        let store = store_with_scopes(&[]).await;
        let eval = ScopeEvaluator::new(store);
        let required = parse_scope("");
        assert!(
            eval.check_scope(&required, &Available::granted(""))
                .await
                .unwrap()
        );
        assert!(
            eval.check_scope(
                &required,
                &Available::Catalogue {
                    realm_id: "main".to_string()
                }
            )
            .await
            .unwrap()
        );
    }

    #[tokio::test]
    async fn test_subset_against_explicit_grant() {
        let store = store_with_scopes(&[]).await;
        let eval = ScopeEvaluator::new(store);
        let available = Available::granted("read write admin");

        assert!(
            eval.check_scope(&parse_scope("read write"), &available)
                .await
                .unwrap()
        );
        assert!(
            !eval
                .check_scope(&parse_scope("read delete"), &available)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_scope_names_case_sensitive() {
        let store = store_with_scopes(&[]).await;
        let eval = ScopeEvaluator::new(store);
        assert!(
            !eval
                .check_scope(&parse_scope("Read"), &Available::granted("read"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_catalogue_resolution_fails_closed() {
        let store = store_with_scopes(&["read", "write"]).await;
        let eval = ScopeEvaluator::new(store);
        let catalogue = Available::Catalogue {
            realm_id: "main".to_string(),
        };

        assert!(
            eval.check_scope(&parse_scope("read write"), &catalogue)
                .await
                .unwrap()
        );
        // One undefined name sinks the whole check
        assert!(
            !eval
                .check_scope(&parse_scope("read missing"), &catalogue)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_catalogue_is_realm_scoped() {
        let store = store_with_scopes(&["read"]).await;
        let eval = ScopeEvaluator::new(store);
        assert!(
            !eval
                .check_scope(
                    &parse_scope("read"),
                    &Available::Catalogue {
                        realm_id: "other".to_string()
                    }
                )
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_default_scope_requires_catalogue_entry() {
        let store = store_with_scopes(&["basic"]).await;
        store.put_realm(&realm(Some("basic"))).await.unwrap();
        let eval = ScopeEvaluator::new(store);

        assert_eq!(
            eval.default_scope(&realm(Some("basic")), &client())
                .await
                .unwrap(),
            Some("basic".to_string())
        );
        // Dangling configuration resolves to no default
        assert_eq!(
            eval.default_scope(&realm(Some("ghost")), &client())
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            eval.default_scope(&realm(None), &client()).await.unwrap(),
            None
        );
    }

    struct FixedResolver(Option<String>);

    #[async_trait]
    impl DefaultScopeResolver for FixedResolver {
        async fn resolve(
            &self,
            _realm: &Realm,
            _client: &Client,
        ) -> Result<Option<String>, OAuthError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_resolver_chain_first_non_empty_wins() {
        let store = store_with_scopes(&["basic"]).await;
        let eval = ScopeEvaluator::new(store)
            .with_resolver(Arc::new(FixedResolver(None)))
            .with_resolver(Arc::new(FixedResolver(Some("custom".to_string()))))
            .with_resolver(Arc::new(FixedResolver(Some("never".to_string()))));

        assert_eq!(
            eval.default_scope(&realm(Some("basic")), &client())
                .await
                .unwrap(),
            Some("custom".to_string())
        );
    }

    struct DenyNamed(&'static str);

    #[async_trait]
    impl ScopeAccessResolver for DenyNamed {
        async fn permits(
            &self,
            _realm: &Realm,
            _client: &Client,
            scope: &ScopeDef,
        ) -> Result<bool, OAuthError> {
            Ok(scope.name != self.0)
        }
    }

    #[tokio::test]
    async fn test_access_open_without_resolvers() {
        let store = store_with_scopes(&["read", "write"]).await;
        let eval = ScopeEvaluator::new(store);
        assert!(
            eval.check_access(&parse_scope("read write"), &realm(None), &client())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_access_resolver_vetoes_named_scope() {
        let store = store_with_scopes(&["read", "write"]).await;
        let eval = ScopeEvaluator::new(store).with_access_resolver(Arc::new(DenyNamed("write")));

        assert!(
            eval.check_access(&parse_scope("read"), &realm(None), &client())
                .await
                .unwrap()
        );
        // One vetoed scope sinks the whole request
        assert!(
            !eval
                .check_access(&parse_scope("read write"), &realm(None), &client())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_access_skips_undefined_names() {
        let store = store_with_scopes(&["read"]).await;
        let eval = ScopeEvaluator::new(store).with_access_resolver(Arc::new(DenyNamed("missing")));
        // "missing" has no catalogue entry, so the resolver never sees it
        assert!(
            eval.check_access(&parse_scope("missing"), &realm(None), &client())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_resolver_empty_string_falls_through() {
        let store = store_with_scopes(&["basic"]).await;
        let eval =
            ScopeEvaluator::new(store).with_resolver(Arc::new(FixedResolver(Some("".to_string()))));

        assert_eq!(
            eval.default_scope(&realm(Some("basic")), &client())
                .await
                .unwrap(),
            Some("basic".to_string())
        );
    }
}
