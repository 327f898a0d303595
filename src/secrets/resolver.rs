//! Secret reference dispatcher.
//!
//! [`SecretResolver`] parses a reference string into a [`SecretReference`] and
//! routes it to the matching backend. Every backend failure propagates to the
//! caller; there is no fallback from one backend to another.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{info, Instrument};

use crate::config::ResolverSettings;
use crate::errors::{ResolverError, Result};
use crate::secrets::config_file::ConfigFileBackend;
use crate::secrets::encryption::EncryptionBackend;
use crate::secrets::env::{decrypt_tagged, EnvBackend};
use crate::secrets::reference::SecretReference;
use crate::secrets::types::SecretString;
use crate::secrets::vault::{MultiVaultManager, VaultClient, VaultHealth, VaultInstanceConfig};

/// Resolves `vault:`, `config:`, `env:`, `encrypted:` and `literal:` references.
pub struct SecretResolver {
    vaults: RwLock<MultiVaultManager>,
    config: ConfigFileBackend,
    env: EnvBackend,
    encryption: Option<Arc<EncryptionBackend>>,
}

impl std::fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretResolver")
            .field("encryption", &self.encryption.as_ref().map(|e| e.key_source()))
            .finish_non_exhaustive()
    }
}

impl SecretResolver {
    /// A resolver with no Vault instances and an empty config document.
    pub fn new(encryption: Option<Arc<EncryptionBackend>>) -> Self {
        Self {
            vaults: RwLock::new(MultiVaultManager::new()),
            config: ConfigFileBackend::empty(encryption.clone()),
            env: EnvBackend::new(encryption.clone()),
            encryption,
        }
    }

    pub fn with_config_document(mut self, document: Value) -> Self {
        self.config = ConfigFileBackend::new(document, self.encryption.clone());
        self
    }

    pub fn with_config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = ConfigFileBackend::from_file(path, self.encryption.clone())?;
        Ok(self)
    }

    pub fn with_vault_manager(mut self, manager: MultiVaultManager) -> Self {
        self.vaults = RwLock::new(manager);
        self
    }

    /// Build a resolver and register every configured Vault instance.
    pub async fn from_settings(settings: &ResolverSettings) -> Result<Self> {
        let encryption = settings
            .encryption_key
            .as_ref()
            .map(|key| EncryptionBackend::new(key.expose_secret()))
            .transpose()?
            .map(Arc::new);

        let mut resolver = Self::new(encryption);
        if let Some(path) = &settings.config_file {
            resolver = resolver.with_config_file(path)?;
        }

        for instance in &settings.vault_instances {
            resolver.add_vault_instance_from_config(instance.clone()).await?;
        }

        info!(
            vault_instances = settings.vault_instances.len(),
            config_file = ?settings.config_file,
            encryption_enabled = resolver.encryption.is_some(),
            "Secret resolver initialized"
        );

        Ok(resolver)
    }

    pub fn encryption(&self) -> Option<&Arc<EncryptionBackend>> {
        self.encryption.as_ref()
    }

    pub fn config_backend(&self) -> &ConfigFileBackend {
        &self.config
    }

    /// Resolve a reference string to its value.
    pub async fn resolve(&self, reference: &str) -> Result<Value> {
        let parsed = SecretReference::parse(reference)?;
        self.resolve_reference(&parsed).await
    }

    /// Resolve an already parsed reference.
    pub async fn resolve_reference(&self, reference: &SecretReference) -> Result<Value> {
        let span = crate::resolve_span!(reference.scheme());
        async move {
            match reference {
                SecretReference::Vault { instance, locator } => {
                    let client = self.vaults.read().await.client(instance)?;
                    client.resolve_locator(locator).await
                }
                SecretReference::Config { path } => self.config.get(path),
                SecretReference::Env { name } => self.env.get(name).map(Value::String),
                SecretReference::Encrypted { token } => {
                    decrypt_tagged(self.encryption.as_deref(), token).map(Value::String)
                }
                SecretReference::Literal(value) => Ok(Value::String(value.clone())),
            }
        }
        .instrument(span)
        .await
    }

    /// Resolve every string leaf of a tree. Map keys and non-string scalars pass through.
    pub fn resolve_tree<'a>(&'a self, tree: &'a Value) -> BoxFuture<'a, Result<Value>> {
        async move {
            match tree {
                Value::String(reference) => self.resolve(reference).await,
                Value::Array(items) => {
                    let mut resolved = Vec::with_capacity(items.len());
                    for item in items {
                        resolved.push(self.resolve_tree(item).await?);
                    }
                    Ok(Value::Array(resolved))
                }
                Value::Object(map) => self.resolve_dict(map).await.map(Value::Object),
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    /// Map form of [`resolve_tree`](Self::resolve_tree).
    pub async fn resolve_dict(&self, data: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut resolved = Map::with_capacity(data.len());
        for (key, value) in data {
            resolved.insert(key.clone(), self.resolve_tree(value).await?);
        }
        Ok(resolved)
    }

    /// Resolve credential references in `config`, connect, and register the instance.
    ///
    /// `vault_token`, `role_id` and `secret_id` may themselves be references
    /// such as `env:VAULT_TOKEN` or `encrypted:...`. Returns the instance name.
    pub async fn add_vault_instance_from_config(
        &self,
        mut config: VaultInstanceConfig,
    ) -> Result<String> {
        config.vault_token = self.resolve_credential(config.vault_token.take()).await?;
        config.role_id = self.resolve_credential(config.role_id.take()).await?;
        config.secret_id = self.resolve_credential(config.secret_id.take()).await?;

        let client = VaultClient::connect(config).await?;
        let name = client.instance_name().to_string();
        self.vaults.write().await.add(client);
        Ok(name)
    }

    async fn resolve_credential(
        &self,
        credential: Option<SecretString>,
    ) -> Result<Option<SecretString>> {
        let Some(credential) = credential else {
            return Ok(None);
        };
        match self.resolve(credential.expose_secret()).await? {
            Value::String(value) => Ok(Some(SecretString::new(value))),
            _ => Err(ResolverError::config("Vault credential reference must resolve to a string")),
        }
    }

    /// Registered Vault instance names, sorted
    pub async fn vault_instances(&self) -> Vec<String> {
        self.vaults.read().await.list_instances()
    }

    pub async fn vault_client(&self, instance_name: &str) -> Result<Arc<VaultClient>> {
        self.vaults.read().await.client(instance_name)
    }

    pub async fn health_check_all(&self) -> BTreeMap<String, VaultHealth> {
        self.vaults.read().await.health_check_all().await
    }
}
