// provider-gateway-rs/src/types.rs
//
// Wire contracts of the analysis and generation collaborators. Field names
// are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Request to the image analysis provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// `data:image/...;base64,` URL or an opaque reference
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_hint: Option<String>,
}

/// Structured signals pulled out of the image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedSignals {
    pub extracted_text: String,
    pub visual_hints: Vec<String>,
    pub personality_signals: Vec<String>,
}

impl ExtractedSignals {
    pub fn is_empty(&self) -> bool {
        self.extracted_text.trim().is_empty()
            && self.visual_hints.is_empty()
            && self.personality_signals.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    #[serde(default)]
    pub extracted_signals: ExtractedSignals,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub needs_more_input: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_message: Option<String>,
}

/// Preference hints forwarded to the generation provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferenceHints {
    pub style_affinities: Vec<String>,
    pub topic_affinities: Vec<String>,
    pub risk_tolerance: f64,
}

/// Request to the text generation provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub signals: ExtractedSignals,
    pub tone: String,
    pub suggestion_type: String,
    pub preferences: PreferenceHints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Number of candidates asked for
    pub count: usize,
}

/// Per-dimension scores a provider may attach to a suggestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentScores {
    pub contextual_relevance: Option<f64>,
    pub creativity: Option<f64>,
    pub appropriateness: Option<f64>,
    pub personalization: Option<f64>,
    pub engagement: Option<f64>,
}

/// One suggestion as returned by the generation provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSuggestion {
    pub text: String,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub component_scores: ComponentScores,
}

/// Generation providers answer with either a bare list or a wrapper object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GenerationResponse {
    List(Vec<RawSuggestion>),
    Wrapped { suggestions: Vec<RawSuggestion> },
}

impl GenerationResponse {
    pub fn into_suggestions(self) -> Vec<RawSuggestion> {
        match self {
            Self::List(list) => list,
            Self::Wrapped { suggestions } => suggestions,
        }
    }
}
