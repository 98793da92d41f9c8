//! # Structured Logging
//!
//! Installs the process-wide `tracing` subscriber. Request correlation is
//! carried by spans (`correlation_id` field) rather than thread-locals, so it
//! survives task hops on the tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};
use uuid::Uuid;

use crate::types::{Error, Result};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
    /// Directory for daily rolling log files; stdout only when unset
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "unknown-service".to_string(),
            json_format: true,
            log_dir: None,
        }
    }
}

impl LoggingConfig {
    /// Reads `LOG_LEVEL`, `LOG_FORMAT` (`json` | `text`) and `LOG_DIR`.
    pub fn from_env<S: Into<String>>(service_name: S) -> Self {
        let defaults = Self::default();
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or(defaults.level),
            service_name: service_name.into(),
            json_format: std::env::var("LOG_FORMAT")
                .map(|format| !format.eq_ignore_ascii_case("text"))
                .unwrap_or(defaults.json_format),
            log_dir: std::env::var("LOG_DIR").ok().filter(|dir| !dir.is_empty()),
        }
    }
}

/// Initializes the structured logging system.
///
/// `RUST_LOG` overrides the configured level. Calling this more than once is a
/// no-op.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.level)));

    let stdout_layer = if config.json_format {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let file_layer = config.log_dir.as_ref().map(|log_dir| {
        let file_appender = RollingFileAppender::new(
            Rotation::DAILY,
            log_dir,
            format!("{}.log", config.service_name),
        );
        let (non_blocking, guard) = NonBlocking::new(file_appender);

        // The guard flushes on drop; it has to live as long as the process.
        Box::leak(Box::new(guard));

        fmt::layer().with_writer(non_blocking).with_ansi(false).boxed()
    });

    let subscriber = Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(Error::Logging(format!("global subscriber already set: {}", e)));
    }

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

/// Generates a fresh correlation ID for requests that did not bring one.
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        std::env::set_var("LOG_FORMAT", "text");
        std::env::set_var("LOG_DIR", "");
        let config = LoggingConfig::from_env("suggestion-api");
        assert_eq!(config.service_name, "suggestion-api");
        assert!(!config.json_format);
        assert!(config.log_dir.is_none());
        std::env::remove_var("LOG_FORMAT");
        std::env::remove_var("LOG_DIR");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            json_format: false,
            ..LoggingConfig::default()
        };
        assert!(init_logging(Some(config.clone())).is_ok());
        assert!(init_logging(Some(config)).is_ok());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(generate_correlation_id(), generate_correlation_id());
    }
}
