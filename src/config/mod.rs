//! # Configuration
//!
//! Environment-driven settings for building a resolver. `.env` files are
//! loaded by the binary (via `dotenvy`) before [`ResolverSettings::from_env`]
//! runs; the library never reads them itself.

pub mod settings;

pub use settings::{
    load_vault_instances, ResolverSettings, CONFIG_FILE_ENV, VAULT_ADDR_ENV,
    VAULT_INSTANCES_ENV, VAULT_MOUNT_PATH_ENV, VAULT_NAMESPACE_ENV, VAULT_TOKEN_ENV,
};
