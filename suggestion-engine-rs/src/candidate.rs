// suggestion-engine-rs/src/candidate.rs
//
// Suggestion candidates. Candidates are immutable once built; scoring wraps
// them in a `ScoredCandidate` instead of changing them.

use content_safety_rs::{SafetyAssessment, SafetyRater};
use once_cell::sync::Lazy;
use provider_gateway_rs::RawSuggestion;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::request::{ProcessingRequest, SuggestionType, Tone};

/// Per-dimension quality scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub contextual_relevance: f64,
    pub creativity: f64,
    pub appropriateness: f64,
    pub personalization: f64,
    pub engagement: f64,
}

impl ComponentScores {
    pub fn clamped(self) -> Self {
        Self {
            contextual_relevance: clamp01(self.contextual_relevance),
            creativity: clamp01(self.creativity),
            appropriateness: clamp01(self.appropriateness),
            personalization: clamp01(self.personalization),
            engagement: clamp01(self.engagement),
        }
    }
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionCandidate {
    pub text: String,
    pub tone: String,
    pub topics: Vec<String>,
    pub scores: ComponentScores,
    pub safety: SafetyAssessment,
    pub is_fallback: bool,
}

impl SuggestionCandidate {
    /// Same candidate served from a fallback source
    pub fn into_fallback(mut self) -> Self {
        self.is_fallback = true;
        self
    }

    /// Dedup key: lowercase, whitespace collapsed, trimmed
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A candidate plus its composite score and preference match
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: SuggestionCandidate,
    pub composite: f64,
    pub preference_match: u32,
}

/// Final, client-facing suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub text: String,
    pub tone: String,
    pub topics: Vec<String>,
    pub score: f64,
    pub component_scores: ComponentScores,
    pub safety_rating: u8,
    pub concerns: Vec<String>,
    pub is_fallback: bool,
}

impl From<&ScoredCandidate> for Suggestion {
    fn from(scored: &ScoredCandidate) -> Self {
        let c = &scored.candidate;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: c.text.clone(),
            tone: c.tone.clone(),
            topics: c.topics.clone(),
            score: (scored.composite * 1000.0).round() / 1000.0,
            component_scores: c.scores,
            safety_rating: c.safety.rating,
            concerns: c.safety.concerns.clone(),
            is_fallback: c.is_fallback,
        }
    }
}

static PERSONALIZATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(your|you're)\b",
        r"(?i)\b(photo|picture|pic)\b",
        r"(?i)\b(profile|bio)\b",
        r"(?i)\b(interest|hobby|passion)\b",
    ])
});

static ENGAGEMENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\?",
        r"(?i)\b(tell me|what|how|when|where|why)\b",
        r"(?i)\b(love|enjoy|excited|amazing|interesting)\b",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(pattern = %p, error = %e, "Skipping invalid scoring pattern");
                None
            }
        })
        .collect()
}

fn count_matches(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().map(|re| re.find_iter(text).count()).sum()
}

fn tone_words(tone: Tone) -> &'static [&'static str] {
    match tone {
        Tone::Playful => &["fun", "playful", "haha", "laugh", "smile", "exciting"],
        Tone::Witty => &["clever", "smart", "wit", "impressive", "interesting", "brilliant"],
        Tone::Romantic => &["beautiful", "gorgeous", "connection", "feel", "heart", "amazing"],
        Tone::Casual => &["cool", "chill", "casual", "easy", "relaxed", "laid-back"],
        Tone::Bold => &["bold", "confident", "direct", "honest", "striking", "fearless"],
    }
}

fn type_words(suggestion_type: SuggestionType) -> &'static [&'static str] {
    match suggestion_type {
        SuggestionType::Opener => &["hey", "hi", "hello"],
        SuggestionType::Response => &["that", "you", "interesting"],
        SuggestionType::Continuation => &["continue", "coffee", "talk"],
    }
}

/// Text heuristics used when the provider sends no score for a dimension
pub mod heuristics {
    use super::*;

    pub fn personalization(text: &str) -> f64 {
        clamp01(count_matches(&PERSONALIZATION_PATTERNS, text) as f64 * 0.2)
    }

    pub fn engagement(text: &str) -> f64 {
        clamp01(count_matches(&ENGAGEMENT_PATTERNS, text) as f64 * 0.15)
    }

    /// Tone fit: 0.5 base plus 0.1 per tone word
    pub fn creativity(text: &str, tone: Tone) -> f64 {
        let lower = text.to_lowercase();
        let hits = tone_words(tone).iter().filter(|w| lower.contains(*w)).count();
        clamp01(0.5 + hits as f64 * 0.1)
    }

    /// Length fit around an 80 character optimum
    pub fn appropriateness(text: &str) -> f64 {
        let len = text.chars().count() as f64;
        let distance = (len - 80.0).abs();
        if len < 10.0 {
            0.0
        } else if len > 280.0 {
            0.3
        } else if distance <= 40.0 {
            1.0 - (distance / 40.0) * 0.3
        } else {
            clamp01(0.7 - ((distance - 40.0) / 100.0) * 0.3)
        }
    }

    pub fn contextual_relevance(text: &str, request: &ProcessingRequest) -> f64 {
        let lower = text.to_lowercase();
        let mut score = 0.5;
        if type_words(request.suggestion_type).iter().any(|w| lower.contains(*w)) {
            score += 0.2;
        }
        if let Some(context) = &request.context {
            let hits = context
                .to_lowercase()
                .split_whitespace()
                .filter(|word| word.chars().count() > 3 && lower.contains(*word))
                .count();
            score += hits as f64 * 0.15;
        }
        clamp01(score)
    }
}

/// Builds candidates from provider output or static text, rating safety once
#[derive(Debug, Clone, Default)]
pub struct CandidateFactory {
    rater: SafetyRater,
}

impl CandidateFactory {
    pub fn new(rater: SafetyRater) -> Self {
        Self { rater }
    }

    pub fn rater(&self) -> &SafetyRater {
        &self.rater
    }

    pub fn from_raw(&self, raw: RawSuggestion, request: &ProcessingRequest) -> SuggestionCandidate {
        let text = raw.text.trim().to_string();
        let given = raw.component_scores;
        let scores = ComponentScores {
            contextual_relevance: given
                .contextual_relevance
                .unwrap_or_else(|| heuristics::contextual_relevance(&text, request)),
            creativity: given
                .creativity
                .unwrap_or_else(|| heuristics::creativity(&text, request.tone)),
            appropriateness: given
                .appropriateness
                .unwrap_or_else(|| heuristics::appropriateness(&text)),
            personalization: given
                .personalization
                .unwrap_or_else(|| heuristics::personalization(&text)),
            engagement: given.engagement.unwrap_or_else(|| heuristics::engagement(&text)),
        }
        .clamped();

        SuggestionCandidate {
            safety: self.rater.rate(&text),
            tone: raw
                .tone
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| request.tone.to_string()),
            topics: raw.topics,
            scores,
            text,
            is_fallback: false,
        }
    }

    pub fn from_static(&self, text: &str, tone: Tone, scores: ComponentScores) -> SuggestionCandidate {
        SuggestionCandidate {
            text: text.to_string(),
            tone: tone.to_string(),
            topics: Vec::new(),
            scores: scores.clamped(),
            safety: self.rater.rate(text),
            is_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ImagePayload;
    use provider_gateway_rs::ComponentScores as WireScores;

    fn request() -> ProcessingRequest {
        let mut r = ProcessingRequest::new(ImagePayload::Reference("https://cdn.example.com/p.jpg".into()));
        r.context = Some("hiking weekend mountains".into());
        r
    }

    #[test]
    fn test_normalized_text() {
        assert_eq!(normalize_text("  Hey   THERE\tfriend "), "hey there friend");
    }

    #[test]
    fn test_heuristics() {
        assert!((heuristics::personalization("Your photo is great, your bio too") - 0.8).abs() < 1e-9);
        assert!((heuristics::engagement("What do you love? Why?") - 0.75).abs() < 1e-9);
        assert_eq!(heuristics::appropriateness("short"), 0.0);
        assert!((heuristics::appropriateness(&"a".repeat(80)) - 1.0).abs() < 1e-9);
        assert!((heuristics::creativity("That sounds fun, makes me smile", Tone::Playful) - 0.7).abs() < 1e-9);
        let relevance = heuristics::contextual_relevance("Hey, how were the mountains this weekend?", &request());
        assert!((relevance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_raw_prefers_provider_scores_and_clamps() {
        let factory = CandidateFactory::default();
        let raw = RawSuggestion {
            text: "  Is that trail as steep as it looks?  ".into(),
            tone: None,
            topics: vec!["hiking".into()],
            component_scores: WireScores {
                creativity: Some(1.7),
                engagement: Some(-0.2),
                ..Default::default()
            },
        };
        let candidate = factory.from_raw(raw, &request());
        assert_eq!(candidate.text, "Is that trail as steep as it looks?");
        assert_eq!(candidate.tone, "playful");
        assert_eq!(candidate.scores.creativity, 1.0);
        assert_eq!(candidate.scores.engagement, 0.0);
        assert_eq!(candidate.safety.rating, 10);
        assert!(!candidate.is_fallback);
    }

    #[test]
    fn test_from_static_is_fallback() {
        let factory = CandidateFactory::default();
        let scores = ComponentScores {
            contextual_relevance: 0.5,
            creativity: 0.7,
            appropriateness: 0.9,
            personalization: 0.5,
            engagement: 0.7,
        };
        let candidate = factory.from_static("That's really cool! Tell me more about that.", Tone::Casual, scores);
        assert!(candidate.is_fallback);
        assert_eq!(candidate.tone, "casual");
    }
}
