//! Safety rating: 10 means nothing matched, every matched category subtracts
//! its penalty once, floored at 0.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::filters::{is_shouting, ContentCategory, ContentFilter, FilterError, DEFAULT_FILTERS};

pub const MAX_RATING: u8 = 10;

/// Result of rating one piece of text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    /// 0 (unsafe) to 10 (clean)
    pub rating: u8,
    pub concerns: Vec<String>,
    pub categories: Vec<ContentCategory>,
}

impl SafetyAssessment {
    pub fn clean() -> Self {
        Self {
            rating: MAX_RATING,
            concerns: Vec::new(),
            categories: Vec::new(),
        }
    }

    pub fn passes(&self, floor: u8) -> bool {
        self.rating >= floor
    }
}

/// Rates suggestion text against the moderation filters
#[derive(Debug, Clone)]
pub struct SafetyRater {
    filters: Vec<ContentFilter>,
    penalties: HashMap<ContentCategory, u8>,
}

impl Default for SafetyRater {
    fn default() -> Self {
        Self {
            filters: DEFAULT_FILTERS.clone(),
            penalties: HashMap::new(),
        }
    }
}

impl SafetyRater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operator block pattern (category `Custom`)
    pub fn with_block_pattern(mut self, pattern: &str) -> Result<Self, FilterError> {
        self.filters.push(ContentFilter::new(ContentCategory::Custom, pattern)?);
        Ok(self)
    }

    /// Overrides the penalty of a category
    pub fn with_penalty(mut self, category: ContentCategory, penalty: u8) -> Result<Self, FilterError> {
        if penalty > MAX_RATING {
            return Err(FilterError::InvalidPenalty(penalty));
        }
        self.penalties.insert(category, penalty);
        Ok(self)
    }

    fn penalty(&self, category: ContentCategory) -> u8 {
        self.penalties
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_penalty())
    }

    pub fn rate(&self, text: &str) -> SafetyAssessment {
        let mut categories: Vec<ContentCategory> = Vec::new();

        for filter in &self.filters {
            if !categories.contains(&filter.category) && filter.matches(text) {
                categories.push(filter.category);
            }
        }
        if !categories.contains(&ContentCategory::Shouting) && is_shouting(text) {
            categories.push(ContentCategory::Shouting);
        }

        if categories.is_empty() {
            return SafetyAssessment::clean();
        }

        let total_penalty: u32 = categories.iter().map(|c| self.penalty(*c) as u32).sum();
        let rating = (MAX_RATING as u32).saturating_sub(total_penalty) as u8;

        tracing::debug!(rating, categories = ?categories, "Suggestion flagged by content filters");

        SafetyAssessment {
            rating,
            concerns: categories.iter().map(|c| c.concern().to_string()).collect(),
            categories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_scores_ten() {
        let rater = SafetyRater::new();
        let assessment = rater.rate("That's amazing! How long have you been doing that?");
        assert_eq!(assessment, SafetyAssessment::clean());
        assert!(assessment.passes(6));
    }

    #[test]
    fn test_explicit_and_pressure_fail_the_floor() {
        let rater = SafetyRater::new();

        let explicit = rater.rate("Want to hook up tonight?");
        assert_eq!(explicit.rating, 4);
        assert_eq!(explicit.concerns, vec!["explicit sexual content".to_string()]);
        assert!(!explicit.passes(6));

        let pressure = rater.rate("Come on, don't be shy and reply");
        assert_eq!(pressure.rating, 5);
        assert_eq!(pressure.categories, vec![ContentCategory::Pressure]);
    }

    #[test]
    fn test_penalties_stack_across_categories() {
        let rater = SafetyRater::new();
        let assessment = rater.rate("You must send nudes, don't be boring");
        assert_eq!(assessment.rating, 0);
        assert_eq!(assessment.categories.len(), 2);
    }

    #[test]
    fn test_minor_concerns_still_pass() {
        let rater = SafetyRater::new();
        let assessment = rater.rate("Love that photo!!! Where was it taken");
        assert_eq!(assessment.rating, 9);
        assert!(assessment.passes(6));
    }

    #[test]
    fn test_custom_block_pattern_and_penalty() {
        let rater = SafetyRater::new()
            .with_block_pattern(r"\bcrypto\b")
            .unwrap()
            .with_penalty(ContentCategory::Custom, 10)
            .unwrap();
        assert_eq!(rater.rate("Want to talk about crypto?").rating, 0);
        assert!(SafetyRater::new().with_penalty(ContentCategory::Custom, 11).is_err());
    }
}
