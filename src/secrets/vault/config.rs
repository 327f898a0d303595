//! Per-instance Vault connection settings.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{ResolverError, Result};
use crate::secrets::types::SecretString;

/// How a client obtains its Vault token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Use a supplied token as-is
    #[default]
    Token,
    /// Exchange role_id/secret_id for a token at `/v1/auth/approle/login`
    #[serde(rename = "approle")]
    AppRole,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Token => write!(f, "token"),
            AuthMethod::AppRole => write!(f, "approle"),
        }
    }
}

/// KV secrets engine wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvVersion {
    V1,
    V2,
}

impl TryFrom<u8> for KvVersion {
    type Error = ResolverError;

    fn try_from(version: u8) -> Result<Self> {
        match version {
            1 => Ok(KvVersion::V1),
            2 => Ok(KvVersion::V2),
            other => Err(ResolverError::config(format!(
                "Unsupported KV version {}; expected 1 or 2",
                other
            ))),
        }
    }
}

impl std::fmt::Display for KvVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvVersion::V1 => write!(f, "1"),
            KvVersion::V2 => write!(f, "2"),
        }
    }
}

/// Connection settings for one named Vault instance.
///
/// Credential fields may hold secret references (`env:VAULT_TOKEN`,
/// `encrypted:...`); `SecretResolver::add_vault_instance_from_config`
/// resolves them before connecting.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VaultInstanceConfig {
    /// Registry key for this instance
    #[serde(default = "default_instance_name")]
    #[validate(length(min = 1, message = "Instance name cannot be empty"))]
    pub instance_name: String,

    /// Base URL, e.g. `https://vault.example.com:8200`
    #[validate(url(message = "Vault URL must be a valid URL"))]
    pub vault_url: String,

    #[serde(default)]
    pub auth_method: AuthMethod,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_token: Option<SecretString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<SecretString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<SecretString>,

    /// Enterprise namespace sent as `X-Vault-Namespace`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_namespace: Option<String>,

    #[serde(default = "default_mount_point")]
    #[validate(length(min = 1, message = "KV mount point cannot be empty"))]
    pub kv_mount_point: String,

    #[serde(default = "default_kv_version")]
    #[validate(range(min = 1, max = 2, message = "KV version must be 1 or 2"))]
    pub kv_version: u8,

    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub timeout_secs: u64,
}

fn default_instance_name() -> String {
    "default".to_string()
}

fn default_mount_point() -> String {
    "secret".to_string()
}

fn default_kv_version() -> u8 {
    2
}

fn default_verify_ssl() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

impl VaultInstanceConfig {
    /// Token-auth instance with defaults for everything else.
    pub fn with_token(
        instance_name: impl Into<String>,
        vault_url: impl Into<String>,
        token: impl Into<SecretString>,
    ) -> Self {
        Self {
            vault_token: Some(token.into()),
            ..Self::base(instance_name.into(), vault_url.into(), AuthMethod::Token)
        }
    }

    /// AppRole-auth instance with defaults for everything else.
    pub fn with_approle(
        instance_name: impl Into<String>,
        vault_url: impl Into<String>,
        role_id: impl Into<SecretString>,
        secret_id: impl Into<SecretString>,
    ) -> Self {
        Self {
            role_id: Some(role_id.into()),
            secret_id: Some(secret_id.into()),
            ..Self::base(instance_name.into(), vault_url.into(), AuthMethod::AppRole)
        }
    }

    fn base(instance_name: String, vault_url: String, auth_method: AuthMethod) -> Self {
        Self {
            instance_name,
            vault_url,
            auth_method,
            vault_token: None,
            role_id: None,
            secret_id: None,
            vault_namespace: None,
            kv_mount_point: default_mount_point(),
            kv_version: default_kv_version(),
            verify_ssl: default_verify_ssl(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.vault_namespace = Some(namespace.into());
        self
    }

    pub fn mount_point(mut self, mount_point: impl Into<String>) -> Self {
        self.kv_mount_point = mount_point.into();
        self
    }

    pub fn kv_version(mut self, kv_version: u8) -> Self {
        self.kv_version = kv_version;
        self
    }

    pub fn verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Field validation plus the credentials the selected auth method needs.
    pub fn validate_config(&self) -> Result<()> {
        self.validate()?;

        let scheme = url::Url::parse(&self.vault_url)
            .map(|parsed| parsed.scheme().to_string())
            .unwrap_or_default();
        if scheme != "http" && scheme != "https" {
            return Err(ResolverError::config(format!(
                "Vault URL for instance '{}' must use http or https, got '{}'",
                self.instance_name, self.vault_url
            )));
        }

        let present = |value: &Option<SecretString>| value.as_ref().is_some_and(|v| !v.is_empty());
        match self.auth_method {
            AuthMethod::Token if !present(&self.vault_token) => Err(ResolverError::config(format!(
                "Vault token is required for token authentication (instance '{}')",
                self.instance_name
            ))),
            AuthMethod::AppRole if !present(&self.role_id) || !present(&self.secret_id) => {
                Err(ResolverError::config(format!(
                    "role_id and secret_id are required for AppRole authentication (instance '{}')",
                    self.instance_name
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: VaultInstanceConfig = serde_json::from_value(json!({
            "vault_url": "https://vault.example.com:8200",
            "vault_token": "env:VAULT_TOKEN"
        }))
        .unwrap();

        assert_eq!(config.instance_name, "default");
        assert_eq!(config.auth_method, AuthMethod::Token);
        assert_eq!(config.kv_mount_point, "secret");
        assert_eq!(config.kv_version, 2);
        assert!(config.verify_ssl);
        assert_eq!(config.timeout_secs, 30);
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_deserialize_approle() {
        let config: VaultInstanceConfig = serde_json::from_value(json!({
            "instance_name": "prod",
            "vault_url": "https://vault.prod:8200",
            "auth_method": "approle",
            "role_id": "role",
            "secret_id": "secret",
            "kv_version": 1
        }))
        .unwrap();

        assert_eq!(config.auth_method, AuthMethod::AppRole);
        assert_eq!(KvVersion::try_from(config.kv_version).unwrap(), KvVersion::V1);
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_invalid_kv_version_rejected() {
        let config =
            VaultInstanceConfig::with_token("dev", "http://127.0.0.1:8200", "root").kv_version(3);
        let err = config.validate_config().unwrap_err();
        assert!(matches!(err, ResolverError::Configuration { .. }));
        assert!(err.to_string().contains("KV version"));
        assert!(KvVersion::try_from(3).is_err());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = VaultInstanceConfig::with_token("dev", "not a url", "root");
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let config = VaultInstanceConfig::with_token("primary", "ftp://vault.example.com", "t");
        let err = config.validate_config().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut config = VaultInstanceConfig::with_token("dev", "http://127.0.0.1:8200", "root");
        config.vault_token = None;
        assert!(matches!(config.validate_config(), Err(ResolverError::Configuration { .. })));

        let mut config =
            VaultInstanceConfig::with_approle("dev", "http://127.0.0.1:8200", "role", "secret");
        config.secret_id = None;
        let err = config.validate_config().unwrap_err();
        assert!(err.to_string().contains("AppRole"));
    }

    #[test]
    fn test_serialize_redacts_credentials() {
        let config =
            VaultInstanceConfig::with_token("dev", "http://127.0.0.1:8200", "hvs.real-token");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hvs.real-token"));
        assert!(json.contains("[REDACTED]"));
    }
}
