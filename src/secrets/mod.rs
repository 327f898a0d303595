//! Secret reference resolution.
//!
//! A manifest carries references instead of secret values. This module turns
//! those references into values, drawing on several backends:
//!
//! - **Vault** (`vault:<instance>:<path>[#key][@version]`): KV v1/v2 over HTTP,
//!   token or AppRole auth, several named instances
//! - **Config file** (`config:<dotted.path>`): one pre-loaded JSON document
//! - **Environment** (`env:<NAME>`): process environment variables
//! - **Encrypted** (`encrypted:<token>`): AES-256-GCM tokens
//! - **Literal** (`literal:<value>` or any unprefixed string)
//!
//! Config-file and environment values that carry the `encrypted:` tag are
//! decrypted on read.
//!
//! # Example
//!
//! ```rust,ignore
//! use manifest_resolver::secrets::{EncryptionBackend, SecretResolver};
//!
//! let encryption = Arc::new(EncryptionBackend::from_env()?);
//! let resolver = SecretResolver::new(Some(encryption)).with_config_file("secrets.json")?;
//! resolver.add_vault_instance_from_config(primary_config).await?;
//!
//! let api_key = resolver.resolve("vault:primary:apps/billing#api_key@3").await?;
//! let resolved = resolver.resolve_tree(&manifest["config"]).await?;
//! ```

pub mod config_file;
pub mod encryption;
pub mod env;
pub mod reference;
pub mod resolver;
pub mod shared;
pub mod types;
pub mod vault;

pub use config_file::ConfigFileBackend;
pub use encryption::{EncryptionBackend, KeySource, ENCRYPTED_PREFIX, ENCRYPTION_KEY_ENV};
pub use env::EnvBackend;
pub use reference::{SecretLocator, SecretReference};
pub use resolver::SecretResolver;
pub use shared::{shared_encryption_backend, shared_secret_resolver};
pub use types::SecretString;
pub use vault::{
    AuthMethod, KvVersion, MultiVaultManager, VaultClient, VaultHealth, VaultInstanceConfig,
};
