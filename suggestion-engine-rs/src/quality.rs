// suggestion-engine-rs/src/quality.rs
//
// Quality Assurance Stage: score, dedupe, guarantee a minimum count, gate on
// safety, rank.

use std::cmp::Ordering;
use std::collections::HashSet;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::{CandidateFactory, ScoredCandidate, Suggestion, SuggestionCandidate};
use crate::config::QualityConfig;
use crate::fallback::static_candidates;
use crate::request::ProcessingRequest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaMetrics {
    pub total_generated: usize,
    pub dropped_for_quality: usize,
    pub dropped_for_duplicate: usize,
    pub dropped_for_safety: usize,
    pub backfilled: usize,
    pub final_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaOutcome {
    pub suggestions: Vec<Suggestion>,
    pub metrics: QaMetrics,
}

#[derive(Debug, Clone)]
pub struct QualityAssurance {
    config: QualityConfig,
    factory: CandidateFactory,
}

impl QualityAssurance {
    pub fn new(config: QualityConfig, factory: CandidateFactory) -> Self {
        Self { config, factory }
    }

    /// Weighted mean of the component scores, normalized by the weight sum
    pub fn composite(&self, candidate: &SuggestionCandidate) -> f64 {
        let w = &self.config.weights;
        let s = &candidate.scores;
        let total = w.total();
        if total <= 0.0 {
            return 0.0;
        }
        let safety = f64::from(candidate.safety.rating) / f64::from(content_safety_rs::MAX_RATING);
        (w.personalization * s.personalization
            + w.engagement * s.engagement
            + w.appropriateness * s.appropriateness
            + w.creativity * s.creativity
            + w.safety * safety
            + w.contextual_relevance * s.contextual_relevance)
            / total
    }

    /// Tone or style match counts once, each matching topic once
    pub fn preference_match(&self, candidate: &SuggestionCandidate, request: &ProcessingRequest) -> u32 {
        let prefs = &request.preferences;
        let tone = candidate.tone.to_lowercase();
        let tone_match = tone == request.tone.as_str()
            || prefs.style_affinities.iter().any(|s| s.to_lowercase() == tone);
        let topic_matches = candidate
            .topics
            .iter()
            .filter(|topic| {
                prefs
                    .topic_affinities
                    .iter()
                    .any(|affinity| affinity.eq_ignore_ascii_case(topic))
            })
            .count() as u32;
        u32::from(tone_match) + topic_matches
    }

    /// Safety floor raised for conservative users, never below the hard floor
    pub fn effective_safety_floor(&self, request: &ProcessingRequest) -> f64 {
        let floor = f64::from(self.config.safety_floor);
        let tolerance = request.preferences.risk_tolerance.clamp(0.0, 1.0);
        (floor + (1.0 - tolerance) * self.config.risk_floor_span).max(floor)
    }

    fn score(&self, candidate: SuggestionCandidate, request: &ProcessingRequest) -> ScoredCandidate {
        ScoredCandidate {
            composite: self.composite(&candidate),
            preference_match: self.preference_match(&candidate, request),
            candidate,
        }
    }

    fn length_ok(&self, text: &str) -> bool {
        let len = text.chars().count();
        len >= self.config.min_text_len && len <= self.config.max_text_len
    }

    /// Static pool entries not already in `seen`, best first
    fn pool(&self, request: &ProcessingRequest, seen: &HashSet<String>) -> Vec<ScoredCandidate> {
        let mut pool: Vec<ScoredCandidate> = static_candidates(&self.factory, request.suggestion_type, request.tone)
            .into_iter()
            .filter(|c| !seen.contains(&c.normalized_text()))
            .map(|c| self.score(c, request))
            .collect();
        pool.sort_by(by_composite_desc);
        pool
    }

    pub fn validate(&self, candidates: Vec<SuggestionCandidate>, request: &ProcessingRequest) -> QaOutcome {
        let mut metrics = QaMetrics {
            total_generated: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return QaOutcome {
                suggestions: Vec::new(),
                metrics,
            };
        }

        // Scoring
        let mut scored: Vec<ScoredCandidate> = candidates.into_iter().map(|c| self.score(c, request)).collect();
        scored.sort_by(by_composite_desc);

        // Deduplication; the higher-scored copy comes first and survives
        let mut seen: HashSet<String> = HashSet::new();
        let mut preferred = Vec::new();
        let mut reserve = Vec::new();
        for candidate in scored {
            if !seen.insert(candidate.candidate.normalized_text()) {
                metrics.dropped_for_duplicate += 1;
                continue;
            }
            if candidate.composite >= self.config.composite_threshold && self.length_ok(&candidate.candidate.text) {
                preferred.push(candidate);
            } else {
                reserve.push(candidate);
            }
        }

        // Minimum-count guarantee: reserve first, then the static pool
        let mut reserve = reserve.into_iter();
        while preferred.len() < self.config.min_count {
            match reserve.next() {
                Some(candidate) => {
                    metrics.backfilled += 1;
                    preferred.push(candidate);
                }
                None => break,
            }
        }
        metrics.dropped_for_quality = reserve.len();
        if preferred.len() < self.config.min_count {
            let needed = self.config.min_count - preferred.len();
            for candidate in self.pool(request, &seen).into_iter().take(needed) {
                seen.insert(candidate.candidate.normalized_text());
                metrics.backfilled += 1;
                preferred.push(candidate);
            }
        }

        // Safety gate, always last
        let floor = self.effective_safety_floor(request);
        let before = preferred.len();
        preferred.retain(|c| f64::from(c.candidate.safety.rating) >= floor);
        metrics.dropped_for_safety = before - preferred.len();
        if preferred.len() < self.config.min_count {
            let needed = self.config.min_count - preferred.len();
            let top_up: Vec<ScoredCandidate> = self
                .pool(request, &seen)
                .into_iter()
                .filter(|c| f64::from(c.candidate.safety.rating) >= floor)
                .take(needed)
                .collect();
            metrics.backfilled += top_up.len();
            preferred.extend(top_up);
        }

        // Final ranking
        preferred.sort_by(|a, b| {
            by_composite_desc(a, b)
                .then_with(|| b.preference_match.cmp(&a.preference_match))
                .then_with(|| a.candidate.text.chars().count().cmp(&b.candidate.text.chars().count()))
        });
        preferred.truncate(self.config.max_count);
        metrics.final_count = preferred.len();

        self.record(&metrics);
        debug!(?metrics, floor, "Quality assurance finished");

        QaOutcome {
            suggestions: preferred.iter().map(Suggestion::from).collect(),
            metrics,
        }
    }

    fn record(&self, metrics: &QaMetrics) {
        counter!("qa_candidates_total", metrics.total_generated as u64);
        counter!("qa_dropped_total", metrics.dropped_for_quality as u64, "reason" => "quality");
        counter!("qa_dropped_total", metrics.dropped_for_duplicate as u64, "reason" => "duplicate");
        counter!("qa_dropped_total", metrics.dropped_for_safety as u64, "reason" => "safety");
        counter!("qa_backfilled_total", metrics.backfilled as u64);
    }
}

fn by_composite_desc(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.composite.partial_cmp(&a.composite).unwrap_or(Ordering::Equal)
}
