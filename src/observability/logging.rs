//! # Structured Logging
//!
//! Subscriber setup and span macros for the resolver.
//!
//! Logs go to stderr so the CLI can keep stdout for JSON results. `RUST_LOG`
//! wins over the configured level when it is set.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::errors::{ResolverError, Result};

pub const LOG_LEVEL_ENV: &str = "MANIFEST_RESOLVER_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "MANIFEST_RESOLVER_LOG_FORMAT";

/// Create a tracing span for one reference resolution.
///
/// ```rust,ignore
/// let span = resolve_span!("vault", instance = "primary");
/// ```
#[macro_export]
macro_rules! resolve_span {
    ($scheme:expr) => {
        tracing::debug_span!(
            "resolve_reference",
            scheme = %$scheme,
            resolution_id = %uuid::Uuid::new_v4()
        )
    };
    ($scheme:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "resolve_reference",
            scheme = %$scheme,
            resolution_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a template expansion pass
#[macro_export]
macro_rules! expand_span {
    ($environment:expr) => {
        tracing::debug_span!(
            "expand_template",
            environment = %$environment,
            expansion_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ResolverError::config(format!(
                "Unknown log format '{}'; expected 'text' or 'json'",
                other
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `manifest_resolver=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

impl LoggingConfig {
    /// Read `MANIFEST_RESOLVER_LOG_LEVEL` and `MANIFEST_RESOLVER_LOG_FORMAT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            if !level.trim().is_empty() {
                config.level = level.trim().to_string();
            }
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        Ok(config)
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Install the global subscriber. A subscriber that is already installed is left in place.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ResolverError::config_with_source(
                format!("Invalid log level '{}'", config.level),
                Box::new(e),
            )
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let installed = match config.format {
        LogFormat::Text => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };

    if installed.is_err() {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_macros_compile() {
        let _span = resolve_span!("vault");
        let _span = resolve_span!("vault", instance = "primary");
        let _span = expand_span!("development");
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_from_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var(LOG_LEVEL_ENV, "debug");
        std::env::set_var(LOG_FORMAT_ENV, "json");

        let config = LoggingConfig::from_env().unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);

        std::env::remove_var(LOG_LEVEL_ENV);
        std::env::remove_var(LOG_FORMAT_ENV);
        assert_eq!(LoggingConfig::from_env().unwrap(), LoggingConfig::default());
    }

    #[test]
    fn test_init_logging_twice_is_ok() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
