// provider-gateway-rs/src/error.rs
//
// Uniform upstream failure type. Every transport error, non-2xx status and
// body parse failure is translated into exactly one `UpstreamErrorKind`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    Timeout,
    RateLimited,
    AuthFailure,
    MalformedResponse,
    ProviderUnavailable,
    Unknown,
}

impl UpstreamErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::AuthFailure => "auth_failure",
            Self::MalformedResponse => "malformed_response",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this failure says something about the provider's health.
    /// Bad credentials and unparseable bodies are our problem, not theirs.
    pub fn counts_against_health(self) -> bool {
        !matches!(self, Self::AuthFailure | Self::MalformedResponse)
    }
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} from provider '{provider}': {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub provider: String,
    pub message: String,
    /// Server-suggested wait before retrying (Retry-After)
    pub retry_after: Option<Duration>,
    /// Response body, kept for diagnostics of malformed or rejected calls
    pub raw_body: Option<String>,
    pub status: Option<u16>,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, provider: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.to_string(),
            message: message.into(),
            retry_after: None,
            raw_body: None,
            status: None,
        }
    }

    pub fn timeout(provider: &str, budget: Duration) -> Self {
        Self::new(
            UpstreamErrorKind::Timeout,
            provider,
            format!("no response within {}ms", budget.as_millis()),
        )
    }

    pub fn rate_limited(provider: &str, retry_after: Option<Duration>) -> Self {
        let mut error = Self::new(UpstreamErrorKind::RateLimited, provider, "rate limit exceeded");
        error.retry_after = retry_after;
        error.status = Some(429);
        error
    }

    pub fn malformed(provider: &str, message: impl Into<String>, raw_body: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::MalformedResponse, provider, message).with_body(raw_body)
    }

    pub fn unavailable(provider: &str, message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::ProviderUnavailable, provider, message)
    }

    pub fn with_body(mut self, raw_body: impl Into<String>) -> Self {
        self.raw_body = Some(raw_body.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Maps a non-2xx HTTP status to an error kind
    pub fn from_status(provider: &str, status: u16, body: String, retry_after: Option<Duration>) -> Self {
        let error = match status {
            401 | 403 => Self::new(
                UpstreamErrorKind::AuthFailure,
                provider,
                format!("credentials rejected (HTTP {})", status),
            ),
            429 => Self::rate_limited(provider, retry_after),
            408 | 504 => Self::new(
                UpstreamErrorKind::Timeout,
                provider,
                format!("upstream timed out (HTTP {})", status),
            ),
            500 | 502 | 503 => Self::unavailable(provider, format!("server error (HTTP {})", status)),
            _ => Self::new(
                UpstreamErrorKind::Unknown,
                provider,
                format!("unexpected status (HTTP {})", status),
            ),
        };
        error.with_status(status).with_body(body)
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after.map(|d| d.as_millis() as u64)
    }
}
