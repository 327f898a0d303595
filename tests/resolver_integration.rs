//! Integration tests for the reference dispatcher and the encryption envelope
//!
//! Covers the non-Vault schemes end to end: literals, config files with
//! encrypted leaves, environment variables, inline encrypted tokens, and
//! building a resolver from environment settings.

use manifest_resolver::config::{ResolverSettings, CONFIG_FILE_ENV, VAULT_ADDR_ENV};
use manifest_resolver::secrets::{
    shared_secret_resolver, EncryptionBackend, SecretResolver, ENCRYPTION_KEY_ENV,
};
use manifest_resolver::{ResolverError, Result};
use serde_json::json;
use std::env;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

// Use a mutex to serialize tests that modify environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Restores a set of environment variables when dropped
struct EnvSnapshot(Vec<(&'static str, Option<String>)>);

impl EnvSnapshot {
    fn take(names: &[&'static str]) -> Self {
        Self(names.iter().map(|name| (*name, env::var(name).ok())).collect())
    }
}

impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        for (name, value) in &self.0 {
            match value {
                Some(value) => env::set_var(name, value),
                None => env::remove_var(name),
            }
        }
    }
}

fn passphrase_backend() -> Arc<EncryptionBackend> {
    Arc::new(EncryptionBackend::new("integration-test-passphrase").unwrap())
}

#[tokio::test]
async fn test_literal_and_unprefixed_references() -> Result<()> {
    let resolver = SecretResolver::new(None);

    assert_eq!(resolver.resolve("literal:abc").await?, json!("abc"));
    assert_eq!(resolver.resolve("abc").await?, json!("abc"));
    assert_eq!(resolver.resolve("bogus_scheme_value").await?, json!("bogus_scheme_value"));

    // Resolving a literal twice gives the same value
    let once = resolver.resolve("literal:literal:x").await?;
    assert_eq!(once, json!("literal:x"));
    Ok(())
}

#[tokio::test]
async fn test_config_file_with_encrypted_leaf() -> Result<()> {
    let backend = passphrase_backend();
    let document = json!({
        "database": {
            "host": "db.internal",
            "port": 5432,
            "password": backend.encrypt("db-pass")?
        }
    });
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", document).unwrap();

    let resolver = SecretResolver::new(Some(backend)).with_config_file(file.path())?;

    assert_eq!(resolver.resolve("config:database.host").await?, json!("db.internal"));
    assert_eq!(resolver.resolve("config:database.port").await?, json!(5432));
    assert_eq!(resolver.resolve("config:database.password").await?, json!("db-pass"));

    let err = resolver.resolve("config:database.user").await.unwrap_err();
    assert!(matches!(err, ResolverError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_encrypted_reference_requires_key() -> Result<()> {
    let backend = passphrase_backend();
    let token = backend.encrypt("top-secret")?;

    let with_key = SecretResolver::new(Some(backend));
    assert_eq!(with_key.resolve(&token).await?, json!("top-secret"));

    let without_key = SecretResolver::new(None);
    let err = without_key.resolve(&token).await.unwrap_err();
    assert!(matches!(err, ResolverError::Configuration { .. }));
    Ok(())
}

#[tokio::test]
async fn test_token_from_another_key_fails_to_decrypt() -> Result<()> {
    let token = EncryptionBackend::new("key-one")?.encrypt("value")?;
    let resolver = SecretResolver::new(Some(Arc::new(EncryptionBackend::new("key-two")?)));

    let err = resolver.resolve(&token).await.unwrap_err();
    assert!(matches!(err, ResolverError::Decryption { .. }));
    Ok(())
}

#[tokio::test]
async fn test_resolve_tree_mixes_schemes() -> Result<()> {
    let backend = passphrase_backend();
    let token = backend.encrypt("api-token")?;
    let resolver = SecretResolver::new(Some(backend))
        .with_config_document(json!({"service": {"region": "eu-west-1"}}));

    let tree = json!({
        "region": "config:service.region",
        "token": token,
        "replicas": 3,
        "enabled": true,
        "tags": ["literal:blue", "green"],
        "config:service.region": "keys are left alone"
    });

    let resolved = resolver.resolve_tree(&tree).await?;
    assert_eq!(
        resolved,
        json!({
            "region": "eu-west-1",
            "token": "api-token",
            "replicas": 3,
            "enabled": true,
            "tags": ["blue", "green"],
            "config:service.region": "keys are left alone"
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_resolver_from_environment_settings() -> Result<()> {
    let _guard = ENV_MUTEX.lock().unwrap();
    let _snapshot = EnvSnapshot::take(&[
        ENCRYPTION_KEY_ENV,
        CONFIG_FILE_ENV,
        VAULT_ADDR_ENV,
        "MR_IT_ENCRYPTED_ENV_VALUE",
    ]);

    let key = EncryptionBackend::generate_key()?;
    let backend = EncryptionBackend::new(&key)?;

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", json!({"smtp": {"password": backend.encrypt("mail-pass")?}})).unwrap();

    env::set_var(ENCRYPTION_KEY_ENV, &key);
    env::set_var(CONFIG_FILE_ENV, file.path());
    env::remove_var(VAULT_ADDR_ENV);
    env::set_var("MR_IT_ENCRYPTED_ENV_VALUE", backend.encrypt("env-pass")?);

    let settings = ResolverSettings::from_env()?;
    assert!(settings.vault_instances.is_empty());

    let resolver = SecretResolver::from_settings(&settings).await?;
    assert_eq!(resolver.resolve("config:smtp.password").await?, json!("mail-pass"));
    assert_eq!(resolver.resolve("env:MR_IT_ENCRYPTED_ENV_VALUE").await?, json!("env-pass"));

    let shared = shared_secret_resolver(true).await?;
    let again = shared_secret_resolver(false).await?;
    assert!(Arc::ptr_eq(&shared, &again));
    assert_eq!(shared.resolve("config:smtp.password").await?, json!("mail-pass"));
    Ok(())
}

#[test]
fn test_encrypt_dict_with_allow_list() -> Result<()> {
    let backend = EncryptionBackend::new(&EncryptionBackend::generate_key()?)?;
    let data = json!({
        "username": "app",
        "password": "hunter2",
        "nested": {"password": "inner", "note": "plain"},
        "port": 5432
    });
    let map = data.as_object().unwrap();

    let encrypted = backend.encrypt_dict(map, Some(&["password"][..]))?;
    assert_eq!(encrypted["username"], json!("app"));
    assert_eq!(encrypted["port"], json!(5432));
    assert_eq!(encrypted["nested"]["note"], json!("plain"));
    assert!(EncryptionBackend::is_encrypted(encrypted["password"].as_str().unwrap()));
    assert!(EncryptionBackend::is_encrypted(encrypted["nested"]["password"].as_str().unwrap()));

    let decrypted = backend.decrypt_dict(&encrypted, None)?;
    assert_eq!(&decrypted, map);
    Ok(())
}
