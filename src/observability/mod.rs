//! # Observability
//!
//! Structured logging for the resolver library and CLI. Library code only
//! emits `tracing` events; binaries call [`init_logging`] once at startup.

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
