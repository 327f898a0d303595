//! # manifest-resolver
//!
//! Resolves secret references and configuration placeholders embedded in
//! deployment manifests.
//!
//! ## Architecture
//!
//! ```text
//! reference string ──▶ SecretResolver ──▶ vault:     VaultClient (MultiVaultManager)
//!                                     ──▶ config:    ConfigFileBackend
//!                                     ──▶ env:       EnvBackend
//!                                     ──▶ encrypted: EncryptionBackend
//!
//! manifest tree + EnvironmentContext ──▶ TemplateExpander ──▶ Expansion
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use manifest_resolver::config::ResolverSettings;
//! use manifest_resolver::secrets::SecretResolver;
//!
//! #[tokio::main]
//! async fn main() -> manifest_resolver::Result<()> {
//!     let settings = ResolverSettings::from_env()?;
//!     let resolver = SecretResolver::from_settings(&settings).await?;
//!     let password = resolver.resolve("vault:primary:apps/db#password").await?;
//!     println!("{}", password.is_string());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod secrets;
pub mod template;

pub use config::ResolverSettings;
pub use errors::{ResolverError, Result};
pub use secrets::{EncryptionBackend, SecretReference, SecretResolver};
pub use template::{EnvironmentContext, Expansion, TemplateExpander};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "manifest-resolver");
    }
}
