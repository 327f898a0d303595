//! Resolver settings loaded from the process environment.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{ResolverError, Result};
use crate::observability::LoggingConfig;
use crate::secrets::encryption::ENCRYPTION_KEY_ENV;
use crate::secrets::types::SecretString;
use crate::secrets::vault::VaultInstanceConfig;

pub const CONFIG_FILE_ENV: &str = "MANIFEST_RESOLVER_CONFIG_FILE";
pub const VAULT_INSTANCES_ENV: &str = "MANIFEST_RESOLVER_VAULT_INSTANCES";
pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";
pub const VAULT_NAMESPACE_ENV: &str = "VAULT_NAMESPACE";
pub const VAULT_MOUNT_PATH_ENV: &str = "VAULT_MOUNT_PATH";

/// Everything needed to build a `SecretResolver`
#[derive(Debug, Clone, Default)]
pub struct ResolverSettings {
    /// Direct key material or passphrase for `encrypted:` values
    pub encryption_key: Option<SecretString>,

    /// JSON document backing `config:` references
    pub config_file: Option<PathBuf>,

    /// Vault instances to register at startup
    pub vault_instances: Vec<VaultInstanceConfig>,

    pub logging: LoggingConfig,
}

impl ResolverSettings {
    /// Load settings from environment variables.
    ///
    /// - `ENCRYPTION_KEY`: key or passphrase
    /// - `MANIFEST_RESOLVER_CONFIG_FILE`: JSON config document
    /// - `MANIFEST_RESOLVER_VAULT_INSTANCES`: JSON file holding an array of instance configs
    /// - `VAULT_ADDR`, `VAULT_TOKEN`, `VAULT_NAMESPACE`, `VAULT_MOUNT_PATH`: an implicit
    ///   `default` instance when both address and token are set, unless the instances
    ///   file already defines one
    pub fn from_env() -> Result<Self> {
        let encryption_key = non_empty_var(ENCRYPTION_KEY_ENV).map(SecretString::new);
        let config_file = non_empty_var(CONFIG_FILE_ENV).map(PathBuf::from);

        let mut vault_instances = match non_empty_var(VAULT_INSTANCES_ENV) {
            Some(path) => load_vault_instances(&path)?,
            None => Vec::new(),
        };

        if let Some(default_instance) = default_instance_from_env() {
            if vault_instances.iter().any(|i| i.instance_name == default_instance.instance_name) {
                debug!("VAULT_ADDR ignored; instances file already defines 'default'");
            } else {
                vault_instances.push(default_instance);
            }
        }

        let settings = Self {
            encryption_key,
            config_file,
            vault_instances,
            logging: LoggingConfig::from_env()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check instance configs and reject duplicate instance names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for instance in &self.vault_instances {
            instance.validate_config()?;
            if !seen.insert(instance.instance_name.as_str()) {
                return Err(ResolverError::config(format!(
                    "Vault instance '{}' is defined more than once",
                    instance.instance_name
                )));
            }
        }
        Ok(())
    }
}

/// Parse a JSON array of Vault instance configs.
pub fn load_vault_instances(path: impl AsRef<Path>) -> Result<Vec<VaultInstanceConfig>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ResolverError::io(format!("Failed to read Vault instances file '{}'", path.display()), e)
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        ResolverError::serialization(
            format!("Vault instances file '{}' is not a valid instance list", path.display()),
            e,
        )
    })
}

fn default_instance_from_env() -> Option<VaultInstanceConfig> {
    let address = non_empty_var(VAULT_ADDR_ENV)?;
    let Some(token) = non_empty_var(VAULT_TOKEN_ENV) else {
        debug!("VAULT_ADDR set without VAULT_TOKEN; no 'default' Vault instance registered");
        return None;
    };

    let mut config = VaultInstanceConfig::with_token("default", address, token);
    if let Some(namespace) = non_empty_var(VAULT_NAMESPACE_ENV) {
        config = config.namespace(namespace);
    }
    if let Some(mount_path) = non_empty_var(VAULT_MOUNT_PATH_ENV) {
        config = config.mount_point(mount_path);
    }
    Some(config)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
