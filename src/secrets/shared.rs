//! Process-wide shared instances.
//!
//! Prefer building an [`EncryptionBackend`] or [`SecretResolver`] at startup
//! and passing the `Arc` around. These accessors exist for call sites that
//! cannot be threaded through; first construction happens under a lock so
//! concurrent callers observe a single instance, and `force_new` rebuilds it
//! (e.g. after rotating `ENCRYPTION_KEY`).

use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::ResolverSettings;
use crate::errors::Result;
use crate::secrets::encryption::EncryptionBackend;
use crate::secrets::resolver::SecretResolver;

static SHARED_ENCRYPTION: Lazy<RwLock<Option<Arc<EncryptionBackend>>>> =
    Lazy::new(|| RwLock::new(None));

static SHARED_RESOLVER: Lazy<Mutex<Option<Arc<SecretResolver>>>> = Lazy::new(|| Mutex::new(None));

/// Shared encryption backend built from `ENCRYPTION_KEY`.
pub fn shared_encryption_backend(force_new: bool) -> Result<Arc<EncryptionBackend>> {
    if !force_new {
        let current = SHARED_ENCRYPTION.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(backend) = current.as_ref() {
            return Ok(backend.clone());
        }
    }

    let mut slot = SHARED_ENCRYPTION.write().unwrap_or_else(PoisonError::into_inner);
    if !force_new {
        if let Some(backend) = slot.as_ref() {
            return Ok(backend.clone());
        }
    }

    let backend = Arc::new(EncryptionBackend::from_env()?);
    *slot = Some(backend.clone());
    info!(force_new, "Shared encryption backend constructed");
    Ok(backend)
}

/// Shared resolver built from [`ResolverSettings::from_env`].
pub async fn shared_secret_resolver(force_new: bool) -> Result<Arc<SecretResolver>> {
    let mut slot = SHARED_RESOLVER.lock().await;
    if !force_new {
        if let Some(resolver) = slot.as_ref() {
            return Ok(resolver.clone());
        }
    }

    let settings = ResolverSettings::from_env()?;
    let resolver = Arc::new(SecretResolver::from_settings(&settings).await?);
    *slot = Some(resolver.clone());
    info!(force_new, "Shared secret resolver constructed");
    Ok(resolver)
}
