// suggestion-engine-rs/src/cache.rs
//
// Last-known-good results, consulted when a stage degrades to cache.

use std::time::Duration;

use error_handling_rs::{FallbackCache, FallbackConfig};

use crate::candidate::SuggestionCandidate;
use crate::config::CacheConfig;
use crate::strategy::Tier;

pub type CacheKey = (String, Tier);

#[derive(Debug)]
pub struct ResultCache {
    inner: FallbackCache<CacheKey, Vec<SuggestionCandidate>>,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        let fallback = FallbackConfig {
            enable_caching: config.enabled,
            default_ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries,
            record_metrics: true,
        };
        Self {
            inner: FallbackCache::new("suggestion_results", Some(fallback)),
        }
    }

    /// Stores a successful, non-degraded result
    pub fn store(&self, fingerprint: &str, tier: Tier, candidates: Vec<SuggestionCandidate>) {
        if candidates.is_empty() {
            return;
        }
        self.inner.put((fingerprint.to_string(), tier), candidates, None);
    }

    /// Cached candidates, marked as fallback
    pub fn lookup(&self, fingerprint: &str, tier: Tier) -> Option<Vec<SuggestionCandidate>> {
        self.inner
            .get(&(fingerprint.to_string(), tier))
            .map(|candidates| candidates.into_iter().map(SuggestionCandidate::into_fallback).collect())
    }

    pub fn len(&self) -> usize {
        self.inner.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{CandidateFactory, ComponentScores};
    use crate::request::Tone;

    fn candidate() -> SuggestionCandidate {
        let scores = ComponentScores {
            contextual_relevance: 0.5,
            creativity: 0.5,
            appropriateness: 0.5,
            personalization: 0.5,
            engagement: 0.5,
        };
        let mut c = CandidateFactory::default().from_static("What's the story behind that mural?", Tone::Bold, scores);
        c.is_fallback = false;
        c
    }

    #[test]
    fn test_hits_are_marked_fallback_and_keyed_by_tier() {
        let cache = ResultCache::new(&CacheConfig::default());
        cache.store("abc", Tier::Standard, vec![candidate()]);

        let hit = cache.lookup("abc", Tier::Standard).unwrap();
        assert!(hit.iter().all(|c| c.is_fallback));
        assert!(cache.lookup("abc", Tier::Fast).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = ResultCache::new(&CacheConfig {
            enabled: false,
            ..Default::default()
        });
        cache.store("abc", Tier::Fast, vec![candidate()]);
        assert!(cache.is_empty());
    }
}
