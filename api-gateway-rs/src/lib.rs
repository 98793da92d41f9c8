//! HTTP surface of the suggestion engine.
//!
//! | method | path | |
//! |---|---|---|
//! | POST | `/api/v1/stream/analyze` | submit, `202` with a session ticket |
//! | GET | `/api/v1/stream/status/:stream_id` | poll |
//! | DELETE | `/api/v1/stream/:stream_id` | cancel |
//! | GET | `/api/v1/stream/:stream_id/events` | push (server-sent events) |
//! | GET | `/api/v1/stream/health`, `/health` | engine health |
//! | GET | `/metrics` | Prometheus exposition |

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::Stream;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use suggestion_engine_rs::{
    ClientKind, EngineHealth, QaMetrics, SessionStatus, SessionTicket, StreamSession, Submission, Suggestion,
    SuggestionEngine, Tier,
};
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod error;
pub mod rate_limit;
pub mod validation;

use error::ApiError;
use rate_limit::RateLimiter;
use validation::{
    parse_json_body, payload_limit_config, sanitize_json_object, validate_analyze_request, validate_content_type,
    ApiValidationError, MAX_PAYLOAD_SIZE,
};

/// Marks a request as coming from the keyboard extension
pub const EXTENSION_HEADER: &str = "x-keyboard-extension";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Poll view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub stream_id: String,
    pub status: SessionStatus,
    pub progress: u8,
    pub current_phase: Option<String>,
    pub tier: Tier,
    pub degraded: bool,
    pub estimated_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Suggestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_metrics: Option<QaMetrics>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StreamSession> for StatusResponse {
    fn from(session: &StreamSession) -> Self {
        Self {
            stream_id: session.id.clone(),
            status: session.status,
            progress: session.progress,
            current_phase: session.current_phase.clone(),
            tier: session.tier,
            degraded: session.degraded,
            estimated_duration_ms: session.estimated_duration_ms,
            suggestions: session.suggestions.clone(),
            error: session.error.clone(),
            guidance_message: session.guidance_message.clone(),
            qa_metrics: session.qa_metrics,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub stream_id: String,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub engine: EngineHealth,
}

/// Core API Gateway state
pub struct ApiGateway {
    engine: Arc<SuggestionEngine>,
    limiter: Arc<RateLimiter>,
    metrics: Option<PrometheusHandle>,
}

impl std::fmt::Debug for ApiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiGateway")
            .field("engine", &self.engine)
            .field("limiter", &self.limiter)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl ApiGateway {
    pub fn new(engine: Arc<SuggestionEngine>, limiter: RateLimiter, metrics: Option<PrometheusHandle>) -> Self {
        Lazy::force(&START_TIME);
        Self {
            engine,
            limiter: Arc::new(limiter),
            metrics,
        }
    }

    pub fn engine(&self) -> &Arc<SuggestionEngine> {
        &self.engine
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Create the Axum router with all routes and middleware
    pub fn create_router(self: Arc<Self>) -> Router {
        let analyze = post(Self::analyze_handler)
            .route_layer(middleware::from_fn_with_state(self.clone(), Self::rate_limit_middleware));

        Router::new()
            .route("/", get(Self::root_handler))
            .route("/health", get(Self::health_handler))
            .route("/metrics", get(Self::metrics_handler))
            .route("/api/v1/stream/analyze", analyze)
            .route("/api/v1/stream/health", get(Self::health_handler))
            .route("/api/v1/stream/status/:stream_id", get(Self::status_handler))
            .route("/api/v1/stream/:stream_id", delete(Self::cancel_handler))
            .route("/api/v1/stream/:stream_id/events", get(Self::events_handler))
            .layer(payload_limit_config())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .with_state(self)
    }

    async fn root_handler() -> impl IntoResponse {
        Json(serde_json::json!({
            "service": "Suggestion API Gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": [
                "POST /api/v1/stream/analyze",
                "GET /api/v1/stream/status/:stream_id",
                "DELETE /api/v1/stream/:stream_id",
                "GET /api/v1/stream/:stream_id/events",
                "GET /api/v1/stream/health",
                "GET /health",
                "GET /metrics"
            ]
        }))
    }

    async fn rate_limit_middleware(State(state): State<Arc<Self>>, req: Request, next: Next) -> Response {
        let client = rate_limit::client_key(req.headers());
        match state.limiter.check(&client) {
            Ok(()) => next.run(req).await,
            Err(err) => err.into_response(),
        }
    }

    async fn analyze_handler(
        State(state): State<Arc<Self>>,
        headers: HeaderMap,
        body: Body,
    ) -> Result<(StatusCode, Json<SessionTicket>), ApiError> {
        validate_content_type(&headers, "application/json")?;
        let bytes = to_bytes(body, MAX_PAYLOAD_SIZE).await.map_err(|e| {
            ApiValidationError::PayloadTooLarge(format!("could not read body within {} bytes: {}", MAX_PAYLOAD_SIZE, e))
        })?;

        let mut payload = parse_json_body(&bytes)?;
        validate_analyze_request(&payload)?;
        sanitize_json_object(&mut payload);
        let mut submission: Submission = serde_json::from_value(payload)
            .map_err(|e| ApiValidationError::InvalidFormat(e.to_string()))?;

        if submission.correlation_id.is_none() {
            submission.correlation_id = header_value(&headers, CORRELATION_HEADER);
        }
        let header_kind = header_value(&headers, EXTENSION_HEADER)
            .filter(|v| v.eq_ignore_ascii_case("true"))
            .map(|_| ClientKind::Extension);

        let ticket = state.engine.submit(submission, header_kind)?;
        counter!("api_sessions_accepted_total", 1, "tier" => ticket.tier.as_str());
        info!(stream_id = %ticket.stream_id, tier = %ticket.tier, "Analyze request accepted");
        Ok((StatusCode::ACCEPTED, Json(ticket)))
    }

    async fn status_handler(
        State(state): State<Arc<Self>>,
        Path(stream_id): Path<String>,
    ) -> Result<Json<StatusResponse>, ApiError> {
        let session = state.engine.get_status(&stream_id)?;
        Ok(Json(StatusResponse::from(&session)))
    }

    async fn cancel_handler(
        State(state): State<Arc<Self>>,
        Path(stream_id): Path<String>,
    ) -> Result<Json<CancelResponse>, ApiError> {
        let cancelled = state.engine.cancel(&stream_id)?;
        Ok(Json(CancelResponse { stream_id, cancelled }))
    }

    /// One `status` event per snapshot; the stream ends after a terminal one
    async fn events_handler(
        State(state): State<Arc<Self>>,
        Path(stream_id): Path<String>,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
        let mut rx = state.engine.subscribe(&stream_id)?;

        let stream = async_stream::stream! {
            loop {
                let view = StatusResponse::from(&*rx.borrow_and_update());
                let done = view.status.is_terminal();
                match Event::default().event("status").json_data(&view) {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        warn!(stream_id = %view.stream_id, error = %e, "Failed to encode status event");
                        break;
                    }
                }
                if done || rx.changed().await.is_err() {
                    break;
                }
            }
        };

        Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
    }

    async fn health_handler(State(state): State<Arc<Self>>) -> impl IntoResponse {
        let health = state.engine.health();
        Json(HealthResponse {
            healthy: health.status == "healthy",
            service_name: "api-gateway".to_string(),
            uptime_seconds: START_TIME.elapsed().as_secs(),
            engine: health,
        })
    }

    async fn metrics_handler(State(state): State<Arc<Self>>) -> Result<String, ApiError> {
        state
            .metrics
            .as_ref()
            .map(PrometheusHandle::render)
            .ok_or(ApiError::MetricsUnavailable)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
