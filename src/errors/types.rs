//! # Error Types
//!
//! Error taxonomy for secret reference and placeholder resolution using `thiserror`.

/// Custom result type for resolver operations
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Boxed error source carried by variants that wrap a foreign cause
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for secret resolution
#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    /// A reference string does not follow the scheme grammar
    #[error("Invalid reference '{reference}': {reason}")]
    ReferenceFormat { reference: String, reason: String },

    /// A named Vault instance is not registered
    #[error("Vault instance '{instance}' is not registered")]
    BackendNotFound { instance: String },

    /// Missing secret path, key, config dot-path, or environment variable
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Network failure or error status returned by Vault
    #[error("Vault transport error for instance '{instance}'{}: {message}", status_suffix(.status))]
    Transport {
        instance: String,
        status: Option<u16>,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Authentication against Vault failed
    #[error("Authentication failed for Vault instance '{instance}': {message}")]
    Authentication { instance: String, message: String },

    /// Integrity failure, wrong key, or malformed token during decrypt
    #[error("Decryption failed: {message}")]
    Decryption {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Missing or invalid configuration (including absent key material)
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (status {})", code)).unwrap_or_default()
}

impl ResolverError {
    /// Create a reference format error
    pub fn reference_format<R: Into<String>, S: Into<String>>(reference: R, reason: S) -> Self {
        Self::ReferenceFormat { reference: reference.into(), reason: reason.into() }
    }

    /// Create a backend-not-found error
    pub fn backend_not_found<S: Into<String>>(instance: S) -> Self {
        Self::BackendNotFound { instance: instance.into() }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a transport error carrying an HTTP status
    pub fn http_status<I: Into<String>, S: Into<String>>(
        instance: I,
        status: u16,
        message: S,
    ) -> Self {
        Self::Transport {
            instance: instance.into(),
            status: Some(status),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection-level transport error (no status code)
    pub fn connection<I: Into<String>, S: Into<String>>(
        instance: I,
        message: S,
        source: BoxedSource,
    ) -> Self {
        Self::Transport {
            instance: instance.into(),
            status: None,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an authentication error
    pub fn authentication<I: Into<String>, S: Into<String>>(instance: I, message: S) -> Self {
        Self::Authentication { instance: instance.into(), message: message.into() }
    }

    /// Create a decryption error
    pub fn decryption<S: Into<String>>(message: S) -> Self {
        Self::Decryption { message: message.into(), source: None }
    }

    /// Create a decryption error wrapping its cause
    pub fn decryption_with_source<S: Into<String>>(message: S, source: BoxedSource) -> Self {
        Self::Decryption { message: message.into(), source: Some(source) }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(message: S, source: BoxedSource) -> Self {
        Self::Configuration { message: message.into(), source: Some(source) }
    }

    /// Create a serialization error with context
    pub fn serialization<S: Into<String>>(context: S, source: serde_json::Error) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// HTTP status code attached to a transport error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ResolverError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether this error came from talking to Vault rather than from local input
    pub fn is_transport(&self) -> bool {
        matches!(self, ResolverError::Transport { .. })
    }
}

impl From<std::io::Error> for ResolverError {
    fn from(error: std::io::Error) -> Self {
        Self::io("I/O operation failed", error)
    }
}

impl From<serde_json::Error> for ResolverError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization("JSON serialization failed", error)
    }
}

impl From<validator::ValidationErrors> for ResolverError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect();
        fields.sort();

        Self::config(format!("Validation failed: {}", fields.join("; ")))
    }
}
