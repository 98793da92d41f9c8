// provider-gateway-rs/src/provider.rs

use async_trait::async_trait;
use serde_json::Value;

use crate::error::UpstreamError;

/// One upstream AI endpoint.
///
/// `send` performs a single attempt and returns the raw response body.
/// Implementations never retry and never enforce the call budget; the
/// gateway wraps every call in its own timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    async fn send(&self, payload: &Value) -> Result<String, UpstreamError>;
}
