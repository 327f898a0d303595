//! Environment variable secrets backend.
//!
//! Resolves `env:<NAME>` references by reading the process environment.
//! Values that carry the `encrypted:` tag are decrypted on read, so an
//! operator can export `DB_PASSWORD=encrypted:gAAAA...` instead of the
//! plaintext.

use std::env;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{ResolverError, Result};
use crate::secrets::encryption::{EncryptionBackend, ENCRYPTION_KEY_ENV};

/// Environment variable lookup with decrypt-on-read.
#[derive(Debug, Clone, Default)]
pub struct EnvBackend {
    encryption: Option<Arc<EncryptionBackend>>,
}

impl EnvBackend {
    pub fn new(encryption: Option<Arc<EncryptionBackend>>) -> Self {
        Self { encryption }
    }

    /// Read `name` from the environment, decrypting tagged values.
    pub fn get(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Err(ResolverError::reference_format("env:", "variable name is empty"));
        }

        let value = env::var(name).map_err(|_| {
            ResolverError::not_found(format!("Environment variable '{}' not found", name))
        })?;

        if !EncryptionBackend::is_encrypted(&value) {
            return Ok(value);
        }

        debug!(variable = %name, "Decrypting encrypted environment value");
        decrypt_tagged(self.encryption.as_deref(), &value)
    }

    pub fn exists(&self, name: &str) -> bool {
        !name.is_empty() && env::var_os(name).is_some()
    }
}

/// Decrypt a tagged value, failing with a configuration error when no key is loaded.
pub(crate) fn decrypt_tagged(
    encryption: Option<&EncryptionBackend>,
    value: &str,
) -> Result<String> {
    let backend = encryption.ok_or_else(|| {
        ResolverError::config(format!(
            "Encountered an encrypted value but no encryption key is loaded. Set {}",
            ENCRYPTION_KEY_ENV
        ))
    })?;
    backend.decrypt(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine;

    fn backend_with_key() -> (EnvBackend, Arc<EncryptionBackend>) {
        let encryption = Arc::new(EncryptionBackend::new(&URL_SAFE.encode([9u8; 32])).unwrap());
        (EnvBackend::new(Some(encryption.clone())), encryption)
    }

    #[test]
    fn test_get_plain_value() {
        env::set_var("MANIFEST_RESOLVER_TEST_ENV_PLAIN", "plain-value");

        let backend = EnvBackend::default();
        assert_eq!(backend.get("MANIFEST_RESOLVER_TEST_ENV_PLAIN").unwrap(), "plain-value");
        assert!(backend.exists("MANIFEST_RESOLVER_TEST_ENV_PLAIN"));

        env::remove_var("MANIFEST_RESOLVER_TEST_ENV_PLAIN");
    }

    #[test]
    fn test_get_missing_variable() {
        let backend = EnvBackend::default();
        let err = backend.get("MANIFEST_RESOLVER_TEST_ENV_MISSING").unwrap_err();
        assert!(matches!(err, ResolverError::NotFound { .. }));
        assert!(err.to_string().contains("MANIFEST_RESOLVER_TEST_ENV_MISSING"));
        assert!(!backend.exists("MANIFEST_RESOLVER_TEST_ENV_MISSING"));
    }

    #[test]
    fn test_encrypted_value_is_decrypted() {
        let (backend, encryption) = backend_with_key();
        let token = encryption.encrypt("db-password").unwrap();
        env::set_var("MANIFEST_RESOLVER_TEST_ENV_ENCRYPTED", &token);

        assert_eq!(backend.get("MANIFEST_RESOLVER_TEST_ENV_ENCRYPTED").unwrap(), "db-password");

        env::remove_var("MANIFEST_RESOLVER_TEST_ENV_ENCRYPTED");
    }

    #[test]
    fn test_encrypted_value_without_key_is_configuration_error() {
        let (_, encryption) = backend_with_key();
        let token = encryption.encrypt("db-password").unwrap();
        env::set_var("MANIFEST_RESOLVER_TEST_ENV_NO_KEY", &token);

        let err = EnvBackend::default().get("MANIFEST_RESOLVER_TEST_ENV_NO_KEY").unwrap_err();
        assert!(matches!(err, ResolverError::Configuration { .. }));

        env::remove_var("MANIFEST_RESOLVER_TEST_ENV_NO_KEY");
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = EnvBackend::default().get("").unwrap_err();
        assert!(matches!(err, ResolverError::ReferenceFormat { .. }));
    }
}
