//! # Error Handling
//!
//! Error taxonomy shared by every backend. Callers can tell apart a malformed
//! reference, an unregistered Vault instance, a missing value, a Vault transport
//! failure, a decryption failure, and missing configuration.

pub mod types;

pub use types::{BoxedSource, ResolverError, Result};
