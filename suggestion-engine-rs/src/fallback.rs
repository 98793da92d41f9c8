// suggestion-engine-rs/src/fallback.rs
//
// Built-in, pre-vetted suggestions served when upstream providers cannot
// deliver, and used to back-fill short result sets.

use crate::candidate::{CandidateFactory, ComponentScores, SuggestionCandidate};
use crate::request::{SuggestionType, Tone};

const OPENERS: &[&str] = &[
    "Hey! Your profile caught my attention - what's been the highlight of your day?",
    "I love your energy! What got you into that?",
    "That's amazing! How long have you been doing that?",
    "You seem like someone with great stories. What's been exciting in your world lately?",
    "I have to ask - is that from an actual adventure or are you just naturally photogenic?",
    "Okay, I'm curious - what's something you're really looking forward to this month?",
];

const RESPONSES: &[&str] = &[
    "That's actually really interesting! I wasn't expecting that perspective.",
    "That sounds amazing! What inspired you to get into that?",
    "I love how passionate you sound about that. What got you so into it?",
    "That's really cool! Tell me more about that.",
    "You're making me curious - what's the most exciting part about it?",
    "Ha, I did not see that coming. How did that happen?",
];

const CONTINUATIONS: &[&str] = &[
    "This conversation is getting interesting. Want to grab coffee and keep talking?",
    "I feel like we're really connecting here. Want to continue this conversation over coffee?",
    "I'm really enjoying this chat. What do you say we continue it in person?",
    "You seem like someone I'd love to get to know better. Coffee sometime?",
    "This is turning into the kind of conversation I love. Want to continue it over drinks?",
    "I'd love to hear the rest of that story. Are you free for a walk this weekend?",
];

pub fn static_texts(suggestion_type: SuggestionType) -> &'static [&'static str] {
    match suggestion_type {
        SuggestionType::Opener => OPENERS,
        SuggestionType::Response => RESPONSES,
        SuggestionType::Continuation => CONTINUATIONS,
    }
}

/// Size of the smallest static pool. `min_count` above this could not be
/// guaranteed once every provider candidate has been dropped.
pub fn smallest_pool() -> usize {
    [OPENERS, RESPONSES, CONTINUATIONS]
        .iter()
        .map(|pool| pool.len())
        .min()
        .unwrap_or(0)
}

/// The static pool for a suggestion type, in preference order. Scores step
/// down with position so pool order survives ranking.
pub fn static_candidates(
    factory: &CandidateFactory,
    suggestion_type: SuggestionType,
    tone: Tone,
) -> Vec<SuggestionCandidate> {
    static_texts(suggestion_type)
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let step = i as f64 * 0.05;
            let scores = ComponentScores {
                contextual_relevance: 0.5,
                creativity: 0.7,
                appropriateness: 0.9,
                personalization: 0.7 - step,
                engagement: 0.7 - step,
            };
            factory.from_static(text, tone, scores)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_are_safe_and_flagged() {
        let factory = CandidateFactory::default();
        for kind in [SuggestionType::Opener, SuggestionType::Response, SuggestionType::Continuation] {
            let pool = static_candidates(&factory, kind, Tone::Witty);
            assert_eq!(pool.len(), 6);
            for candidate in &pool {
                assert!(candidate.is_fallback);
                assert_eq!(candidate.safety.rating, 10, "{}", candidate.text);
                assert!(candidate.text.chars().count() <= 280);
            }
        }
    }

    #[test]
    fn test_pool_order_is_preference_order() {
        let factory = CandidateFactory::default();
        let pool = static_candidates(&factory, SuggestionType::Response, Tone::Playful);
        assert!(pool[0].scores.personalization > pool[5].scores.personalization);
    }

    #[test]
    fn test_every_pool_covers_max_count() {
        assert!(smallest_pool() >= crate::config::QualityConfig::default().max_count);
    }
}
