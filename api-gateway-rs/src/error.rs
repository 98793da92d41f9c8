// api-gateway-rs/src/error.rs
//
// Every error leaving the gateway is rendered as `{error, code, details?}`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use error_handling_rs::sanitize_message;
use serde::{Deserialize, Serialize};
use suggestion_engine_rs::{RequestError, SessionError};
use thiserror::Error;

use crate::validation::ApiValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Validation(#[from] ApiValidationError),

    #[error("Stream {0} not found")]
    NotFound(String),

    #[error("Stream {0} cannot be changed")]
    Conflict(String),

    #[error("Rate limit exceeded: {limit} analyze requests per {window_secs}s")]
    RateLimited {
        limit: u32,
        window_secs: u64,
        retry_after_secs: u64,
    },

    #[error("Metrics recorder is not installed")]
    MetricsUnavailable,
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => Self::NotFound(id),
            SessionError::Terminal { id, .. } | SessionError::Duplicate(id) => Self::Conflict(id),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Request(RequestError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Request(_) => StatusCode::BAD_REQUEST,
            Self::Validation(err) => err.status(),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::MetricsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Request(err) => err.code(),
            Self::Validation(err) => err.code(),
            Self::NotFound(_) => "STREAM_NOT_FOUND",
            Self::Conflict(_) => "STREAM_CONFLICT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::MetricsUnavailable => "METRICS_UNAVAILABLE",
        }
    }

    fn details(&self) -> Option<Vec<String>> {
        match self {
            Self::Validation(ApiValidationError::Schema(details)) => Some(details.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: sanitize_message(&self.to_string()),
            code: self.code().to_string(),
            details: self.details(),
        };

        metrics::counter!("api_errors_total", 1, "code" => self.code());
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %body.error, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %body.error, "Request rejected");
        }

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after_secs, .. } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
