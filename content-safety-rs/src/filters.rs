//! Content Filtering Module
//!
//! Moderation patterns for short conversational suggestions. Each filter
//! belongs to a category; a category contributes its penalty once no matter
//! how many of its patterns match.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content filter error types
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid filter pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Penalty must be between 0 and 10, got {0}")]
    InvalidPenalty(u8),
}

/// Content classification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    /// Sexual or explicit content
    Explicit,
    /// Pushy or coercive phrasing
    Pressure,
    /// Insults and demeaning remarks
    Harassment,
    /// Asking for phone numbers, addresses or locations
    ContactSolicitation,
    /// Shouting: mostly uppercase text or stacked exclamation marks
    Shouting,
    /// Operator-supplied block patterns
    Custom,
}

impl ContentCategory {
    /// Default rating penalty applied when the category matches
    pub fn default_penalty(self) -> u8 {
        match self {
            Self::Explicit => 6,
            Self::Harassment => 6,
            Self::Pressure => 5,
            Self::ContactSolicitation => 3,
            Self::Shouting => 1,
            Self::Custom => 5,
        }
    }

    /// Human-readable concern recorded on the assessment
    pub fn concern(self) -> &'static str {
        match self {
            Self::Explicit => "explicit sexual content",
            Self::Pressure => "pressuring language",
            Self::Harassment => "insulting or demeaning language",
            Self::ContactSolicitation => "requests personal contact details",
            Self::Shouting => "excessive capitalization or punctuation",
            Self::Custom => "matches operator block list",
        }
    }
}

impl std::fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Pressure => write!(f, "pressure"),
            Self::Harassment => write!(f, "harassment"),
            Self::ContactSolicitation => write!(f, "contact_solicitation"),
            Self::Shouting => write!(f, "shouting"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// A compiled moderation pattern
#[derive(Debug, Clone)]
pub struct ContentFilter {
    pub category: ContentCategory,
    pub pattern: Regex,
}

impl ContentFilter {
    pub fn new(category: ContentCategory, pattern: &str) -> Result<Self, FilterError> {
        let pattern = Regex::new(&format!("(?i){}", pattern)).map_err(|e| FilterError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { category, pattern })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

const DEFAULT_PATTERNS: &[(ContentCategory, &str)] = &[
    (ContentCategory::Explicit, r"\b(explicit|sexual|nude|naked)\b"),
    (ContentCategory::Explicit, r"\b(send\s+nudes?|dick\s+pic|sex\s+chat)\b"),
    (ContentCategory::Explicit, r"\b(hook\s*up|one\s+night\s+stand)\b"),
    (ContentCategory::Pressure, r"\byou\s+(should|must|have\s+to|need\s+to)\b"),
    (ContentCategory::Pressure, r"\bdon'?t\s+be\s+(shy|scared|afraid|boring)\b"),
    (ContentCategory::Pressure, r"\bcome\s+on\b"),
    (ContentCategory::Pressure, r"\bwhat'?s\s+wrong\s+with\s+you\b"),
    (ContentCategory::Harassment, r"\b(ugly|stupid|idiot|loser|dumb|pathetic)\b"),
    (ContentCategory::ContactSolicitation, r"\b(what'?s|send\s+me|give\s+me)\s+your\s+(number|address|location)\b"),
    (ContentCategory::ContactSolicitation, r"\bwhere\s+do\s+you\s+live\b"),
    (ContentCategory::Shouting, r"[!?]{3,}"),
];

/// The built-in filter set, compiled once
pub static DEFAULT_FILTERS: Lazy<Vec<ContentFilter>> = Lazy::new(|| {
    DEFAULT_PATTERNS
        .iter()
        .filter_map(|(category, pattern)| match ContentFilter::new(*category, pattern) {
            Ok(filter) => Some(filter),
            Err(e) => {
                tracing::error!(error = %e, "Skipping invalid built-in filter");
                None
            }
        })
        .collect()
});

/// Mostly-uppercase text with enough letters to be meaningful
pub fn is_shouting(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 12 {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64 >= 0.6
}
