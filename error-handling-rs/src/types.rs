//! Errors raised by the shared infrastructure in this crate.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The global tracing subscriber could not be installed
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    /// The bulkhead semaphore was closed while waiting for a permit
    #[error("Bulkhead {name} is closed")]
    BulkheadClosed { name: String },
}

impl Error {
    /// Stable code for logs and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            Self::Logging(_) => "LOGGING_INIT",
            Self::BulkheadClosed { .. } => "BULKHEAD_CLOSED",
        }
    }
}
