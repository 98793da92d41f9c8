//! API Gateway Input Validation
//!
//! First line of defense for inbound requests: content type, body size and
//! JSON Schema checks run before anything reaches the engine. Field-level
//! semantics (image decoding, tier names, context length) are checked again
//! by the engine itself.

use axum::http::{HeaderMap, StatusCode};
use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Value};

/// Maximum request payload size (10MB)
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

lazy_static::lazy_static! {
    /// Schema for the analyze request. `image` is deliberately not required
    /// so a missing image reports `MISSING_IMAGE_DATA` rather than a schema
    /// error.
    pub static ref ANALYZE_REQUEST_SCHEMA: Result<JSONSchema, String> = {
        let strings = json!({ "type": "array", "items": { "type": "string", "maxLength": 64 }, "maxItems": 32 });
        let schema = json!({
            "type": "object",
            "properties": {
                "image": { "type": "string" },
                "image_data": { "type": "string" },
                "context": { "type": ["string", "null"], "maxLength": 1000 },
                "suggestion_type": { "enum": ["opener", "response", "continuation"] },
                "tone": { "enum": ["playful", "witty", "romantic", "casual", "bold"] },
                "user_preferences": {
                    "type": "object",
                    "properties": {
                        "style_affinities": strings,
                        "topic_affinities": strings,
                        "risk_tolerance": { "type": "number", "minimum": 0, "maximum": 1 }
                    },
                    "additionalProperties": false
                },
                "tier": { "type": "string", "maxLength": 32 },
                "timeout_ms": { "type": "integer", "minimum": 1 },
                "client_kind": { "enum": ["interactive_app", "extension"] },
                "correlation_id": { "type": "string", "maxLength": 128 }
            },
            "additionalProperties": false
        });

        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| e.to_string())
    };
}

/// Validation error for API requests
#[derive(Debug, thiserror::Error)]
pub enum ApiValidationError {
    #[error("Invalid request format: {0}")]
    InvalidFormat(String),

    #[error("Content type must be {0}")]
    ContentType(String),

    #[error("Request payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Request does not match the expected schema")]
    Schema(Vec<String>),
}

impl ApiValidationError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidFormat(_) | Self::Schema(_) => StatusCode::BAD_REQUEST,
            Self::ContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            _ => "INVALID_FIELD",
        }
    }
}

/// Validate the Content-Type header
pub fn validate_content_type(headers: &HeaderMap, expected: &str) -> Result<(), ApiValidationError> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !content_type.starts_with(expected) {
        return Err(ApiValidationError::ContentType(format!(
            "'{}', got '{}'",
            expected, content_type
        )));
    }

    Ok(())
}

/// Parse a request body, enforcing the payload limit
pub fn parse_json_body(body: &[u8]) -> Result<Value, ApiValidationError> {
    if body.len() > MAX_PAYLOAD_SIZE {
        return Err(ApiValidationError::PayloadTooLarge(format!(
            "{} bytes exceeds the {} byte limit",
            body.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    serde_json::from_slice(body).map_err(|e| ApiValidationError::InvalidFormat(format!("Invalid JSON: {}", e)))
}

/// Validate an analyze request against its schema
pub fn validate_analyze_request(payload: &Value) -> Result<(), ApiValidationError> {
    let schema = ANALYZE_REQUEST_SCHEMA
        .as_ref()
        .map_err(|e| ApiValidationError::InvalidFormat(format!("request schema unavailable: {}", e)))?;

    if let Err(errors) = schema.validate(payload) {
        let details: Vec<String> = errors
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{}: {}", path, err)
                }
            })
            .collect();
        return Err(ApiValidationError::Schema(details));
    }

    Ok(())
}

/// Strip NUL bytes and surrounding whitespace from every string in the payload
pub fn sanitize_json_object(value: &mut Value) {
    match value {
        Value::String(s) => {
            let cleaned = s.trim().replace('\u{0000}', "");
            if &cleaned != s {
                *s = cleaned;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_json_object),
        Value::Object(fields) => fields.values_mut().for_each(sanitize_json_object),
        _ => {}
    }
}

/// Outer body limit for every route
pub fn payload_limit_config() -> tower_http::limit::RequestBodyLimitLayer {
    tower_http::limit::RequestBodyLimitLayer::new(MAX_PAYLOAD_SIZE)
}
