//! Config file secrets backend.
//!
//! Holds one JSON document, loaded once, and answers `config:<dotted.path>`
//! lookups against it. String leaves tagged `encrypted:` are decrypted on the
//! way out.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{ResolverError, Result};
use crate::secrets::encryption::EncryptionBackend;
use crate::secrets::env::decrypt_tagged;

#[derive(Debug, Clone)]
pub struct ConfigFileBackend {
    document: Value,
    encryption: Option<Arc<EncryptionBackend>>,
}

impl ConfigFileBackend {
    pub fn new(document: Value, encryption: Option<Arc<EncryptionBackend>>) -> Self {
        Self { document, encryption }
    }

    /// An empty document; every lookup is `NotFound`.
    pub fn empty(encryption: Option<Arc<EncryptionBackend>>) -> Self {
        Self::new(Value::Object(Default::default()), encryption)
    }

    /// Load the document from a JSON file.
    pub fn from_file(
        path: impl AsRef<Path>,
        encryption: Option<Arc<EncryptionBackend>>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ResolverError::io(format!("Failed to read config file '{}'", path.display()), e)
        })?;
        let document: Value = serde_json::from_str(&contents).map_err(|e| {
            ResolverError::serialization(
                format!("Config file '{}' is not valid JSON", path.display()),
                e,
            )
        })?;

        info!(path = %path.display(), "Loaded secrets config file");
        Ok(Self::new(document, encryption))
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Walk `dot_path` through nested maps and return the value found there.
    pub fn get(&self, dot_path: &str) -> Result<Value> {
        if dot_path.is_empty() {
            return Err(ResolverError::reference_format("config:", "config path is empty"));
        }

        let mut current = &self.document;
        for segment in dot_path.split('.') {
            current = current.as_object().and_then(|map| map.get(segment)).ok_or_else(|| {
                ResolverError::not_found(format!(
                    "Config key '{}' not found in configuration file",
                    dot_path
                ))
            })?;
        }

        match current {
            Value::String(s) if EncryptionBackend::is_encrypted(s) => {
                debug!(path = %dot_path, "Decrypting encrypted config value");
                decrypt_tagged(self.encryption.as_deref(), s).map(Value::String)
            }
            other => Ok(other.clone()),
        }
    }
}
