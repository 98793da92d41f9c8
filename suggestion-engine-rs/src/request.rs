// suggestion-engine-rs/src/request.rs
//
// Inbound request model and its validation. A `ProcessingRequest` is built
// once from a `Submission` and never mutated afterwards.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use provider_gateway_rs::PreferenceHints;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::strategy::Tier;

/// Largest accepted decoded image
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_CONTEXT_CHARS: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("Image data is required")]
    MissingImage,

    #[error("Invalid image format: {0}")]
    InvalidImageFormat(String),

    #[error("Image is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Unknown tier '{0}' (expected fast, standard, comprehensive or auto)")]
    UnknownTier(String),

    #[error("Unknown tone '{0}'")]
    UnknownTone(String),

    #[error("Unknown suggestion type '{0}'")]
    UnknownSuggestionType(String),

    #[error("Context is {len} characters, limit is {max}")]
    ContextTooLong { len: usize, max: usize },

    #[error("Timeout must be positive")]
    InvalidTimeout,

    #[error("Risk tolerance must be within [0, 1], got {0}")]
    InvalidRiskTolerance(f64),
}

impl RequestError {
    /// Stable code reported to API clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingImage => "MISSING_IMAGE_DATA",
            Self::InvalidImageFormat(_) => "INVALID_IMAGE_FORMAT",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            _ => "INVALID_FIELD",
        }
    }
}

/// Generates a `FromStr`/`Display` pair for a lowercase tag enum.
macro_rules! tag_enum {
    ($name:ident, $err:ident, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = RequestError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($tag => Ok(Self::$variant),)+
                    _ => Err(RequestError::$err(s.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    #[default]
    Opener,
    Response,
    Continuation,
}

tag_enum!(SuggestionType, UnknownSuggestionType, {
    Opener => "opener",
    Response => "response",
    Continuation => "continuation",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Playful,
    Witty,
    Romantic,
    Casual,
    Bold,
}

tag_enum!(Tone, UnknownTone, {
    Playful => "playful",
    Witty => "witty",
    Romantic => "romantic",
    Casual => "casual",
    Bold => "bold",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    #[default]
    InteractiveApp,
    /// Keyboard extension: tight memory and latency limits
    Extension,
}

/// Image payload: decoded inline bytes or an opaque reference
#[derive(Clone, PartialEq, Eq)]
pub enum ImagePayload {
    Inline { mime: String, bytes: Vec<u8> },
    Reference(String),
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline { mime, bytes } => write!(f, "Inline({}, {} bytes)", mime, bytes.len()),
            Self::Reference(r) => write!(f, "Reference({})", r),
        }
    }
}

impl ImagePayload {
    /// Parses `data:image/<type>;base64,<data>` or an http(s) reference
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RequestError::MissingImage);
        }

        if let Some(rest) = raw.strip_prefix("data:") {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| RequestError::InvalidImageFormat("data URL has no payload".into()))?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| RequestError::InvalidImageFormat("data URL must be base64 encoded".into()))?;
            if !mime.starts_with("image/") {
                return Err(RequestError::InvalidImageFormat(format!("unsupported media type '{}'", mime)));
            }
            // Reject before decoding anything huge
            let approx = data.len() / 4 * 3;
            if approx > MAX_IMAGE_BYTES + 3 {
                return Err(RequestError::PayloadTooLarge {
                    size: approx,
                    limit: MAX_IMAGE_BYTES,
                });
            }
            let bytes = BASE64
                .decode(data.trim())
                .map_err(|e| RequestError::InvalidImageFormat(format!("invalid base64: {}", e)))?;
            if bytes.is_empty() {
                return Err(RequestError::MissingImage);
            }
            if bytes.len() > MAX_IMAGE_BYTES {
                return Err(RequestError::PayloadTooLarge {
                    size: bytes.len(),
                    limit: MAX_IMAGE_BYTES,
                });
            }
            return Ok(Self::Inline {
                mime: mime.to_string(),
                bytes,
            });
        }

        if raw.starts_with("https://") || raw.starts_with("http://") {
            return Ok(Self::Reference(raw.to_string()));
        }

        Err(RequestError::InvalidImageFormat(
            "image must be a data:image/ URL or an http(s) reference".into(),
        ))
    }

    pub fn byte_len(&self) -> usize {
        match self {
            Self::Inline { bytes, .. } => bytes.len(),
            Self::Reference(r) => r.len(),
        }
    }

    /// Wire form sent to the analysis provider
    pub fn to_wire(&self) -> String {
        match self {
            Self::Inline { mime, bytes } => format!("data:{};base64,{}", mime, BASE64.encode(bytes)),
            Self::Reference(r) => r.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub style_affinities: Vec<String>,
    pub topic_affinities: Vec<String>,
    /// 0 is conservative, 1 is adventurous
    pub risk_tolerance: f64,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            style_affinities: Vec::new(),
            topic_affinities: Vec::new(),
            risk_tolerance: 0.5,
        }
    }
}

impl UserPreferences {
    pub fn to_hints(&self) -> PreferenceHints {
        PreferenceHints {
            style_affinities: self.style_affinities.clone(),
            topic_affinities: self.topic_affinities.clone(),
            risk_tolerance: self.risk_tolerance,
        }
    }
}

/// Raw submission as received from a client, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default, alias = "image_data")]
    pub image: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub suggestion_type: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub user_preferences: Option<UserPreferences>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub client_kind: Option<ClientKind>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingRequest {
    pub image: ImagePayload,
    pub context: Option<String>,
    pub suggestion_type: SuggestionType,
    pub tone: Tone,
    pub preferences: UserPreferences,
    pub client_kind: ClientKind,
    pub tier_override: Option<Tier>,
    pub timeout_override: Option<Duration>,
    pub correlation_id: String,
}

impl ProcessingRequest {
    /// Request with defaults for everything but the image
    pub fn new(image: ImagePayload) -> Self {
        Self {
            image,
            context: None,
            suggestion_type: SuggestionType::default(),
            tone: Tone::default(),
            preferences: UserPreferences::default(),
            client_kind: ClientKind::default(),
            tier_override: None,
            timeout_override: None,
            correlation_id: error_handling_rs::generate_correlation_id(),
        }
    }

    /// Validates a submission. `header_kind` (from transport metadata) wins
    /// over the body's `client_kind`.
    pub fn from_submission(submission: Submission, header_kind: Option<ClientKind>) -> Result<Self, RequestError> {
        let image = ImagePayload::parse(submission.image.as_deref().unwrap_or_default())?;

        let context = match submission.context.map(|c| c.trim().to_string()) {
            Some(c) if c.is_empty() => None,
            Some(c) => {
                let len = c.chars().count();
                if len > MAX_CONTEXT_CHARS {
                    return Err(RequestError::ContextTooLong {
                        len,
                        max: MAX_CONTEXT_CHARS,
                    });
                }
                Some(c)
            }
            None => None,
        };

        let suggestion_type = submission
            .suggestion_type
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();
        let tone = submission.tone.as_deref().map(str::parse).transpose()?.unwrap_or_default();
        let tier_override = submission.tier.as_deref().map(Tier::parse_override).transpose()?.flatten();

        let timeout_override = match submission.timeout_ms {
            Some(0) => return Err(RequestError::InvalidTimeout),
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };

        let preferences = submission.user_preferences.unwrap_or_default();
        if !(0.0..=1.0).contains(&preferences.risk_tolerance) {
            return Err(RequestError::InvalidRiskTolerance(preferences.risk_tolerance));
        }

        let correlation_id = submission
            .correlation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(error_handling_rs::generate_correlation_id);

        Ok(Self {
            image,
            context,
            suggestion_type,
            tone,
            preferences,
            client_kind: header_kind.or(submission.client_kind).unwrap_or_default(),
            tier_override,
            timeout_override,
            correlation_id,
        })
    }

    /// Image bytes plus context bytes
    pub fn payload_size(&self) -> usize {
        self.image.byte_len() + self.context.as_ref().map_or(0, String::len)
    }

    /// Stable digest of everything that shapes the output; keys the result cache
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match &self.image {
            ImagePayload::Inline { bytes, .. } => hasher.update(bytes),
            ImagePayload::Reference(r) => hasher.update(r.as_bytes()),
        }
        hasher.update([0u8]);
        hasher.update(self.context.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.suggestion_type.as_str().as_bytes());
        hasher.update(self.tone.as_str().as_bytes());
        for style in &self.preferences.style_affinities {
            hasher.update(style.as_bytes());
            hasher.update([1u8]);
        }
        for topic in &self.preferences.topic_affinities {
            hasher.update(topic.as_bytes());
            hasher.update([2u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 transparent PNG
    pub(crate) const PIXEL_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    fn submission() -> Submission {
        Submission {
            image: Some(PIXEL_PNG.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let request = ProcessingRequest::from_submission(submission(), None).unwrap();
        assert_eq!(request.suggestion_type, SuggestionType::Opener);
        assert_eq!(request.tone, Tone::Playful);
        assert_eq!(request.client_kind, ClientKind::InteractiveApp);
        assert!(request.tier_override.is_none());
        assert!(!request.correlation_id.is_empty());
        assert!(matches!(request.image, ImagePayload::Inline { ref mime, .. } if mime == "image/png"));
    }

    #[test]
    fn test_image_validation() {
        assert_eq!(ImagePayload::parse("  "), Err(RequestError::MissingImage));
        assert_eq!(ImagePayload::parse("hello").unwrap_err().code(), "INVALID_IMAGE_FORMAT");
        assert_eq!(
            ImagePayload::parse("data:text/plain;base64,aGVsbG8=").unwrap_err().code(),
            "INVALID_IMAGE_FORMAT"
        );
        assert_eq!(
            ImagePayload::parse("data:image/png;base64,@@@").unwrap_err().code(),
            "INVALID_IMAGE_FORMAT"
        );
        assert!(matches!(
            ImagePayload::parse("https://cdn.example.com/a.jpg"),
            Ok(ImagePayload::Reference(_))
        ));

        let huge = format!("data:image/png;base64,{}", "A".repeat(MAX_IMAGE_BYTES / 3 * 4 + 400));
        assert_eq!(ImagePayload::parse(&huge).unwrap_err().code(), "PAYLOAD_TOO_LARGE");
    }

    #[test]
    fn test_inline_round_trips_to_wire() {
        let image = ImagePayload::parse(PIXEL_PNG).unwrap();
        assert_eq!(image.to_wire(), PIXEL_PNG);
    }

    #[test]
    fn test_field_validation() {
        let mut s = submission();
        s.tier = Some("turbo".into());
        assert_eq!(
            ProcessingRequest::from_submission(s, None).unwrap_err(),
            RequestError::UnknownTier("turbo".into())
        );

        let mut s = submission();
        s.tone = Some("sarcastic".into());
        assert_eq!(ProcessingRequest::from_submission(s, None).unwrap_err().code(), "INVALID_FIELD");

        let mut s = submission();
        s.timeout_ms = Some(0);
        assert_eq!(
            ProcessingRequest::from_submission(s, None).unwrap_err(),
            RequestError::InvalidTimeout
        );

        let mut s = submission();
        s.context = Some("x".repeat(MAX_CONTEXT_CHARS + 1));
        assert!(matches!(
            ProcessingRequest::from_submission(s, None),
            Err(RequestError::ContextTooLong { .. })
        ));

        let mut s = submission();
        s.tier = Some("auto".into());
        s.suggestion_type = Some("Continuation".into());
        let request = ProcessingRequest::from_submission(s, Some(ClientKind::Extension)).unwrap();
        assert!(request.tier_override.is_none());
        assert_eq!(request.suggestion_type, SuggestionType::Continuation);
        assert_eq!(request.client_kind, ClientKind::Extension);
    }

    #[test]
    fn test_fingerprint_tracks_inputs() {
        let a = ProcessingRequest::from_submission(submission(), None).unwrap();
        let b = ProcessingRequest::from_submission(submission(), None).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut s = submission();
        s.tone = Some("bold".into());
        let c = ProcessingRequest::from_submission(s, None).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
