//! # Error Handling Framework
//!
//! Shared error type, structured logging and resilience primitives for the
//! suggestion services.
//!
//! ## Features
//!
//! - Structured logging (JSON or text) with span-based correlation
//! - Sanitization of messages that leave the process
//! - Circuit breaker for upstream health tracking
//! - TTL fallback cache and bulkhead concurrency limiter

pub mod circuit_breaker;
pub mod fallback;
pub mod logging;
pub mod sanitization;
pub mod types;

// Re-export commonly used types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitHealth, CircuitState};
pub use fallback::{Bulkhead, FallbackCache, FallbackConfig};
pub use logging::{generate_correlation_id, init_logging, LoggingConfig};
pub use sanitization::sanitize_message;
pub use types::{Error, Result};
