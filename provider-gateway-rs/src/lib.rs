//! Provider Gateway
//!
//! A uniform, timeout-bounded call interface to upstream AI providers. Every
//! failure comes back as an [`UpstreamError`] with exactly one
//! [`UpstreamErrorKind`]; the gateway itself never retries.

pub mod error;
pub mod gateway;
pub mod http_provider;
pub mod provider;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

pub use error::{UpstreamError, UpstreamErrorKind};
pub use gateway::{ProviderGateway, ProviderHealth, DEFAULT_MAX_IN_FLIGHT};
pub use http_provider::{HttpProvider, ProviderSettings, WireFormat};
pub use provider::Provider;
pub use types::{
    AnalysisRequest, AnalysisResponse, ComponentScores, ExtractedSignals, GenerationRequest, PreferenceHints,
    RawSuggestion,
};
