// provider-gateway-rs/src/http_provider.rs
//
// reqwest-backed provider.
//
// Configuration (.env file), per provider id `<ID>` (uppercased):
// - PROVIDER_<ID>_URL: endpoint URL (required)
// - PROVIDER_<ID>_API_KEY: bearer token (optional for local endpoints)
// - PROVIDER_<ID>_MODEL: model name, used by the chat wire format
// - PROVIDER_<ID>_WIRE: `contract` (default) or `chat`
// - PROVIDER_<ID>_SYSTEM_PROMPT: system message for the chat wire format

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{UpstreamError, UpstreamErrorKind};
use crate::provider::Provider;

const DEFAULT_SYSTEM_PROMPT: &str =
    "Respond only with JSON matching the request contract. Do not add commentary.";

/// How the contract payload is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// POST the contract JSON as-is, the body is the contract response
    Contract,
    /// Wrap the contract in an OpenAI-compatible chat completion
    Chat,
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contract" => Ok(Self::Contract),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown wire format '{}'", other)),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contract => write!(f, "contract"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct ProviderSettings {
    pub id: String,
    pub url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub wire: WireFormat,
    pub system_prompt: Option<String>,
}

// Keeps the key out of logs
impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("wire", &self.wire)
            .finish()
    }
}

impl ProviderSettings {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            api_key: None,
            model: None,
            wire: WireFormat::Contract,
            system_prompt: None,
        }
    }

    fn env_name(id: &str, field: &str) -> String {
        let id: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("PROVIDER_{}_{}", id, field)
    }

    /// Loads settings for `id`; `None` when no URL is configured.
    pub fn from_env(id: &str) -> Option<Self> {
        let url: String = config_rs::env_opt(&Self::env_name(id, "URL"))?;
        if url.is_empty() {
            return None;
        }
        let wire_var = Self::env_name(id, "WIRE");
        let wire = match config_rs::env_opt::<String>(&wire_var) {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(provider = %id, error = %e, "Falling back to contract wire format");
                WireFormat::Contract
            }),
            None => WireFormat::Contract,
        };

        Some(Self {
            id: id.to_string(),
            url,
            api_key: config_rs::env_opt::<String>(&Self::env_name(id, "API_KEY")).filter(|k| !k.is_empty()),
            model: config_rs::env_opt(&Self::env_name(id, "MODEL")),
            wire,
            system_prompt: config_rs::env_opt(&Self::env_name(id, "SYSTEM_PROMPT")),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// HTTP provider speaking either the bare contract or a chat completion envelope
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    settings: ProviderSettings,
}

impl HttpProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        // The gateway owns the call budget; this is only a backstop for
        // connections that would otherwise hang forever.
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client, settings }
    }

    pub fn from_env(id: &str) -> Option<Self> {
        let settings = ProviderSettings::from_env(id)?;
        tracing::info!(provider = %id, url = %settings.url, wire = %settings.wire, "HTTP provider configured");
        Some(Self::new(settings))
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Builds the chat completion body. An `image` field in the contract is
    /// sent as an `image_url` content part so vision models can see it.
    fn chat_body(&self, payload: &Value) -> Value {
        let system = self
            .settings
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let mut contract = payload.clone();
        let image = contract
            .as_object_mut()
            .and_then(|obj| obj.remove("image"))
            .and_then(|v| v.as_str().map(str::to_string));

        let user_content = match image {
            Some(url) => json!([
                {"type": "text", "text": contract.to_string()},
                {"type": "image_url", "image_url": {"url": url}}
            ]),
            None => Value::String(contract.to_string()),
        };

        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: Value::String(system),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user_content,
            },
        ];

        let mut body = json!({
            "messages": messages,
            "temperature": 0.7,
        });
        if let Some(model) = &self.settings.model {
            body["model"] = Value::String(model.clone());
        }
        body
    }

    fn unwrap_chat(&self, body: String) -> Result<String, UpstreamError> {
        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            UpstreamError::malformed(&self.settings.id, format!("invalid chat completion: {}", e), body.clone())
        })?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(provider = %self.settings.id, tokens = usage.total_tokens, "Chat completion usage");
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| UpstreamError::malformed(&self.settings.id, "no choices returned in response", body))
    }
}

/// Parses a Retry-After header given in seconds
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn classify_transport(provider: &str, err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::new(UpstreamErrorKind::Timeout, provider, format!("request timed out: {}", err))
    } else if err.is_connect() {
        UpstreamError::unavailable(provider, format!("connection failed: {}", err))
    } else {
        UpstreamError::new(UpstreamErrorKind::Unknown, provider, format!("network error: {}", err))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn send(&self, payload: &Value) -> Result<String, UpstreamError> {
        let id = &self.settings.id;
        let body = match self.settings.wire {
            WireFormat::Contract => payload.clone(),
            WireFormat::Chat => self.chat_body(payload),
        };

        let mut request = self.client.post(&self.settings.url).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| classify_transport(id, e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let text = response.text().await.map_err(|e| classify_transport(id, e))?;

        if !status.is_success() {
            return Err(UpstreamError::from_status(id, status.as_u16(), text, retry_after));
        }

        match self.settings.wire {
            WireFormat::Contract => Ok(text),
            WireFormat::Chat => self.unwrap_chat(text),
        }
    }
}
