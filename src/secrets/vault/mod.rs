//! # Vault backend
//!
//! HTTP client for Vault-compatible KV secrets engines (v1 and v2) and a
//! registry of named instances.
//!
//! ```rust,ignore
//! use manifest_resolver::secrets::vault::{MultiVaultManager, VaultInstanceConfig};
//!
//! let mut vaults = MultiVaultManager::new();
//! vaults
//!     .add_instance(VaultInstanceConfig::with_token("primary", "https://vault:8200", token))
//!     .await?;
//! let api_key = vaults.read_secret("primary", "apps/billing", Some("api_key"), None).await?;
//! ```

pub mod client;
pub mod config;
pub mod manager;

pub use client::{VaultClient, VaultHealth};
pub use config::{AuthMethod, KvVersion, VaultInstanceConfig};
pub use manager::MultiVaultManager;
