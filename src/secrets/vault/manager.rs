//! Registry of named Vault clients.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info};

use super::client::{VaultClient, VaultHealth};
use super::config::VaultInstanceConfig;
use crate::errors::{ResolverError, Result};
use crate::secrets::reference::SecretLocator;

/// Name-keyed set of independently authenticated Vault clients.
///
/// Adding a client under an existing name replaces the previous one.
#[derive(Debug, Default)]
pub struct MultiVaultManager {
    clients: HashMap<String, Arc<VaultClient>>,
}

impl MultiVaultManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected client under its instance name
    pub fn add(&mut self, client: VaultClient) -> Arc<VaultClient> {
        let name = client.instance_name().to_string();
        let client = Arc::new(client);
        if self.clients.insert(name.clone(), client.clone()).is_some() {
            info!(instance = %name, "Replaced Vault instance");
        } else {
            info!(instance = %name, vault_url = %client.vault_url(), "Registered Vault instance");
        }
        client
    }

    /// Connect a client from `config` and register it. Returns the instance name.
    pub async fn add_instance(&mut self, config: VaultInstanceConfig) -> Result<String> {
        let client = VaultClient::connect(config).await?;
        let name = client.instance_name().to_string();
        self.add(client);
        Ok(name)
    }

    pub fn get(&self, instance_name: &str) -> Option<Arc<VaultClient>> {
        self.clients.get(instance_name).cloned()
    }

    /// Like [`get`](Self::get), but an unknown name is a `BackendNotFound` error.
    pub fn client(&self, instance_name: &str) -> Result<Arc<VaultClient>> {
        self.get(instance_name).ok_or_else(|| ResolverError::backend_not_found(instance_name))
    }

    /// Registered instance names, sorted
    pub fn list_instances(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Read from a named instance; the whole secret map when `key` is `None`.
    pub async fn read_secret(
        &self,
        instance_name: &str,
        path: &str,
        key: Option<&str>,
        version: Option<u64>,
    ) -> Result<Value> {
        let mut locator = SecretLocator::new(path);
        locator.key = key.map(str::to_string);
        locator.version = version;
        self.resolve(instance_name, &locator).await
    }

    pub async fn resolve(&self, instance_name: &str, locator: &SecretLocator) -> Result<Value> {
        let client = self.client(instance_name)?;
        debug!(instance = %instance_name, locator = %locator, "Resolving Vault secret");
        client.resolve_locator(locator).await
    }

    /// Health of every registered instance. One failing instance never hides the others.
    pub async fn health_check_all(&self) -> BTreeMap<String, VaultHealth> {
        let checks = self.clients.iter().map(|(name, client)| async move {
            (name.clone(), client.health_check().await)
        });
        join_all(checks).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn token_client(name: &str, url: &str) -> VaultClient {
        VaultClient::connect(VaultInstanceConfig::with_token(name, url, "root")).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_instance_is_backend_not_found() {
        let manager = MultiVaultManager::new();
        let err = manager.read_secret("nosuchinstance", "app", Some("k"), None).await.unwrap_err();
        assert!(matches!(err, ResolverError::BackendNotFound { .. }));
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_add_replaces_and_lists_sorted() {
        let mut manager = MultiVaultManager::new();
        manager.add(token_client("zeta", "http://127.0.0.1:8200").await);
        manager.add(token_client("alpha", "http://127.0.0.1:8200").await);
        manager.add(token_client("zeta", "http://127.0.0.1:8300").await);

        assert_eq!(manager.list_instances(), vec!["alpha", "zeta"]);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get("zeta").unwrap().vault_url(), "http://127.0.0.1:8300");
        assert!(manager.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_read_secret_delegates_to_named_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": { "api_key": "XYZ" } }
            })))
            .mount(&server)
            .await;

        let mut manager = MultiVaultManager::new();
        let name = manager
            .add_instance(VaultInstanceConfig::with_token("primary", server.uri(), "root"))
            .await
            .unwrap();
        assert_eq!(name, "primary");

        let value = manager.read_secret("primary", "app", Some("api_key"), None).await.unwrap();
        assert_eq!(value, json!("XYZ"));
    }

    #[tokio::test]
    async fn test_health_check_all_survives_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "initialized": true, "sealed": false, "version": "1.15.0"
            })))
            .mount(&server)
            .await;

        let mut manager = MultiVaultManager::new();
        manager.add(token_client("up", &server.uri()).await);
        manager.add(token_client("down", "http://127.0.0.1:1").await);

        let results = manager.health_check_all().await;
        assert_eq!(results.len(), 2);
        assert!(results["up"].healthy);
        assert!(!results["down"].healthy);
        assert!(results["down"].error.is_some());
    }
}
