// provider-gateway-rs/src/gateway.rs
//
// Uniform call interface over every configured provider. Each call is bounded
// by a hard timeout, limited by a shared bulkhead and guarded by a
// per-provider circuit breaker. The gateway never retries; recovery is the
// caller's decision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use error_handling_rs::{Bulkhead, CircuitBreaker, CircuitBreakerConfig, CircuitHealth};
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{UpstreamError, UpstreamErrorKind};
use crate::provider::Provider;
use crate::types::{AnalysisRequest, AnalysisResponse, GenerationRequest, GenerationResponse, RawSuggestion};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub circuit: CircuitHealth,
}

pub struct ProviderGateway {
    providers: HashMap<String, Arc<dyn Provider>>,
    bulkhead: Bulkhead,
    breaker: CircuitBreaker,
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.providers.keys().collect();
        ids.sort();
        f.debug_struct("ProviderGateway")
            .field("providers", &ids)
            .field("max_in_flight", &self.bulkhead.max_concurrency())
            .finish()
    }
}

impl Default for ProviderGateway {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT, None)
    }
}

impl ProviderGateway {
    pub fn new(max_in_flight: usize, breaker_config: Option<CircuitBreakerConfig>) -> Self {
        Self {
            providers: HashMap::new(),
            bulkhead: Bulkhead::new("provider_calls", max_in_flight),
            breaker: CircuitBreaker::new("provider_gateway", breaker_config),
        }
    }

    pub fn with_provider(mut self, id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(id, provider);
        self
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn has_provider(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn in_flight(&self) -> usize {
        self.bulkhead.current_concurrency()
    }

    /// One attempt against `provider_id`, bounded by `budget`. Waiting for a
    /// bulkhead permit counts against the budget.
    pub async fn call(&self, provider_id: &str, payload: &Value, budget: Duration) -> Result<String, UpstreamError> {
        let Some(provider) = self.providers.get(provider_id).cloned() else {
            return Err(UpstreamError::unavailable(provider_id, "provider is not configured"));
        };

        if budget.is_zero() {
            return Err(UpstreamError::timeout(provider_id, budget));
        }

        if !self.breaker.is_allowed(provider_id) {
            counter!("provider_calls_total", 1, "provider" => provider_id.to_string(), "outcome" => "short_circuit");
            debug!(provider = %provider_id, "Circuit open, skipping call");
            return Err(UpstreamError::unavailable(provider_id, "circuit open"));
        }
        let verdict = Verdict::new(&self.breaker, provider_id);

        let started = Instant::now();
        let outcome = tokio::time::timeout(budget, self.bulkhead.execute(|| provider.send(payload))).await;
        let result = match outcome {
            Err(_elapsed) => Err(UpstreamError::timeout(provider_id, budget)),
            Ok(Err(limiter)) => Err(UpstreamError::unavailable(provider_id, limiter.to_string())),
            Ok(Ok(result)) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as f64;

        histogram!("provider_call_duration_ms", elapsed_ms, "provider" => provider_id.to_string());
        match &result {
            Ok(_) => {
                verdict.success();
                counter!("provider_calls_total", 1, "provider" => provider_id.to_string(), "outcome" => "success");
            }
            Err(e) => {
                if e.kind.counts_against_health() {
                    verdict.failure();
                } else {
                    verdict.neutral();
                }
                counter!(
                    "provider_calls_total",
                    1,
                    "provider" => provider_id.to_string(),
                    "outcome" => e.kind.as_str()
                );
                warn!(provider = %provider_id, kind = %e.kind, elapsed_ms, "Provider call failed");
            }
        }
        result
    }

    pub async fn analyze(
        &self,
        provider_id: &str,
        request: &AnalysisRequest,
        budget: Duration,
    ) -> Result<AnalysisResponse, UpstreamError> {
        let payload = to_payload(provider_id, request)?;
        let body = self.call(provider_id, &payload, budget).await?;
        parse_body(provider_id, &body)
    }

    pub async fn generate(
        &self,
        provider_id: &str,
        request: &GenerationRequest,
        budget: Duration,
    ) -> Result<Vec<RawSuggestion>, UpstreamError> {
        let payload = to_payload(provider_id, request)?;
        let body = self.call(provider_id, &payload, budget).await?;
        let parsed: GenerationResponse = parse_body(provider_id, &body)?;
        Ok(parsed.into_suggestions())
    }

    pub fn health(&self) -> Vec<ProviderHealth> {
        self.provider_ids()
            .into_iter()
            .map(|provider| ProviderHealth {
                circuit: self.breaker.get_health(&provider),
                provider,
            })
            .collect()
    }
}

fn to_payload<T: Serialize>(provider_id: &str, request: &T) -> Result<Value, UpstreamError> {
    serde_json::to_value(request)
        .map_err(|e| UpstreamError::new(UpstreamErrorKind::Unknown, provider_id, format!("failed to encode request: {}", e)))
}

/// Settles one breaker-admitted call. Dropped unsettled (the call future
/// was abandoned), it reports a neutral outcome so a half-open trial slot is
/// never lost.
struct Verdict<'a> {
    breaker: &'a CircuitBreaker,
    provider: &'a str,
    settled: bool,
}

impl<'a> Verdict<'a> {
    fn new(breaker: &'a CircuitBreaker, provider: &'a str) -> Self {
        Self {
            breaker,
            provider,
            settled: false,
        }
    }

    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.provider);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.provider);
    }

    fn neutral(self) {}
}

impl Drop for Verdict<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_neutral(self.provider);
        }
    }
}

/// Models like to wrap JSON in markdown fences; strip them before parsing.
fn strip_code_fence(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_body<T: DeserializeOwned>(provider_id: &str, body: &str) -> Result<T, UpstreamError> {
    serde_json::from_str(strip_code_fence(body))
        .map_err(|e| UpstreamError::malformed(provider_id, format!("unparseable response: {}", e), body))
}
