//! Secret reference grammar.
//!
//! A reference string is parsed once into a [`SecretReference`] and the
//! resolver matches on the variant:
//!
//! ```text
//! vault:<instance>:<path>[#<key>][@<version>]
//! config:<dotted.key.path>
//! env:<VARIABLE_NAME>
//! encrypted:<urlsafe-base64 token>
//! literal:<raw string>   | <raw string>
//! ```

use std::fmt;

use crate::errors::{ResolverError, Result};
use crate::secrets::encryption::ENCRYPTED_PREFIX;

const VAULT_PREFIX: &str = "vault:";
const CONFIG_PREFIX: &str = "config:";
const ENV_PREFIX: &str = "env:";
const LITERAL_PREFIX: &str = "literal:";

/// Location of a secret inside one Vault instance: `path[#key][@version]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretLocator {
    pub path: String,
    pub key: Option<String>,
    pub version: Option<u64>,
}

impl SecretLocator {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), key: None, version: None }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Parse `path[#key][@version]`.
    ///
    /// The version is split off the end first, then the key, so `#` and `@`
    /// may still appear inside the path itself. An empty key (`path#`) means
    /// "whole secret".
    pub fn parse(composite: &str) -> Result<Self> {
        let (rest, version) = match composite.rsplit_once('@') {
            Some((rest, raw)) => {
                let version = raw.parse::<u64>().map_err(|_| {
                    ResolverError::reference_format(
                        composite,
                        format!("version '{}' is not an unsigned integer", raw),
                    )
                })?;
                (rest, Some(version))
            }
            None => (composite, None),
        };

        let (path, key) = match rest.rsplit_once('#') {
            Some((path, key)) if key.is_empty() => (path, None),
            Some((path, key)) => (path, Some(key.to_string())),
            None => (rest, None),
        };

        if path.is_empty() {
            return Err(ResolverError::reference_format(composite, "secret path is empty"));
        }

        Ok(Self { path: path.to_string(), key, version })
    }
}

impl fmt::Display for SecretLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if let Some(key) = &self.key {
            write!(f, "#{}", key)?;
        }
        if let Some(version) = self.version {
            write!(f, "@{}", version)?;
        }
        Ok(())
    }
}

/// A parsed secret reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretReference {
    /// Secret stored in a named Vault instance
    Vault { instance: String, locator: SecretLocator },
    /// Dotted path into the loaded config document
    Config { path: String },
    /// OS environment variable
    Env { name: String },
    /// Authenticated ciphertext, tag included
    Encrypted { token: String },
    /// Value used as-is
    Literal(String),
}

impl SecretReference {
    /// Parse a reference string. Strings without a recognized scheme are
    /// literals; only a malformed `vault:` reference fails.
    pub fn parse(reference: &str) -> Result<Self> {
        if let Some(rest) = reference.strip_prefix(VAULT_PREFIX) {
            let (instance, composite) = rest.split_once(':').ok_or_else(|| {
                ResolverError::reference_format(
                    reference,
                    "expected 'vault:<instance>:<path>[#key][@version]'",
                )
            })?;
            if instance.is_empty() {
                return Err(ResolverError::reference_format(reference, "instance name is empty"));
            }
            let locator = SecretLocator::parse(composite).map_err(|e| match e {
                ResolverError::ReferenceFormat { reason, .. } => {
                    ResolverError::reference_format(reference, reason)
                }
                other => other,
            })?;
            return Ok(Self::Vault { instance: instance.to_string(), locator });
        }

        if let Some(path) = reference.strip_prefix(CONFIG_PREFIX) {
            return Ok(Self::Config { path: path.to_string() });
        }

        if let Some(name) = reference.strip_prefix(ENV_PREFIX) {
            return Ok(Self::Env { name: name.to_string() });
        }

        if reference.starts_with(ENCRYPTED_PREFIX) {
            return Ok(Self::Encrypted { token: reference.to_string() });
        }

        if let Some(value) = reference.strip_prefix(LITERAL_PREFIX) {
            return Ok(Self::Literal(value.to_string()));
        }

        Ok(Self::Literal(reference.to_string()))
    }

    /// Short scheme name, used in log fields.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Vault { .. } => "vault",
            Self::Config { .. } => "config",
            Self::Env { .. } => "env",
            Self::Encrypted { .. } => "encrypted",
            Self::Literal(_) => "literal",
        }
    }
}

impl std::str::FromStr for SecretReference {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_vault_reference() {
        let reference = SecretReference::parse("vault:primary:secret/app#api_key@3").unwrap();
        assert_eq!(
            reference,
            SecretReference::Vault {
                instance: "primary".to_string(),
                locator: SecretLocator::new("secret/app").with_key("api_key").with_version(3),
            }
        );
    }

    #[test]
    fn test_parse_vault_reference_without_key_or_version() {
        let reference = SecretReference::parse("vault:prod:apps/billing").unwrap();
        match reference {
            SecretReference::Vault { instance, locator } => {
                assert_eq!(instance, "prod");
                assert_eq!(locator, SecretLocator::new("apps/billing"));
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_instance_split_on_first_colon_only() {
        let reference = SecretReference::parse("vault:dev:db:creds#password").unwrap();
        match reference {
            SecretReference::Vault { instance, locator } => {
                assert_eq!(instance, "dev");
                assert_eq!(locator.path, "db:creds");
                assert_eq!(locator.key.as_deref(), Some("password"));
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_missing_instance_separator_is_format_error() {
        let err = SecretReference::parse("vault:secret/app#key").unwrap_err();
        assert!(matches!(err, ResolverError::ReferenceFormat { .. }));
    }

    #[test]
    fn test_bad_version_is_format_error() {
        let err = SecretReference::parse("vault:primary:secret/app#key@latest").unwrap_err();
        match err {
            ResolverError::ReferenceFormat { reference, reason } => {
                assert_eq!(reference, "vault:primary:secret/app#key@latest");
                assert!(reason.contains("latest"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_locator_version_only() {
        let locator = SecretLocator::parse("secret/app@7").unwrap();
        assert_eq!(locator.path, "secret/app");
        assert_eq!(locator.key, None);
        assert_eq!(locator.version, Some(7));
        assert_eq!(locator.to_string(), "secret/app@7");
    }

    #[test]
    fn test_locator_empty_key_means_whole_secret() {
        let locator = SecretLocator::parse("secret/app#").unwrap();
        assert_eq!(locator.key, None);
    }

    #[test]
    fn test_locator_empty_path_rejected() {
        assert!(SecretLocator::parse("#key").is_err());
    }

    #[test]
    fn test_other_schemes() {
        assert_eq!(
            SecretReference::parse("config:database.password").unwrap(),
            SecretReference::Config { path: "database.password".to_string() }
        );
        assert_eq!(
            SecretReference::parse("env:DB_PASSWORD").unwrap(),
            SecretReference::Env { name: "DB_PASSWORD".to_string() }
        );
        assert_eq!(
            SecretReference::parse("encrypted:gAAAA").unwrap(),
            SecretReference::Encrypted { token: "encrypted:gAAAA".to_string() }
        );
    }

    #[test]
    fn test_literal_and_bare_strings() {
        assert_eq!(
            SecretReference::parse("literal:abc").unwrap(),
            SecretReference::Literal("abc".to_string())
        );
        assert_eq!(
            SecretReference::parse("abc").unwrap(),
            SecretReference::Literal("abc".to_string())
        );
        assert_eq!(
            SecretReference::parse("bogus_scheme_value").unwrap().scheme(),
            "literal"
        );
    }
}
