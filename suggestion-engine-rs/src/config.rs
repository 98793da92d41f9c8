// suggestion-engine-rs/src/config.rs
//
// Engine configuration. Every threshold the engine uses lives here, with a
// default for each field, so an empty environment yields a working engine.
//
// Environment overrides use the `ENGINE` prefix and `__` as the nesting
// separator, e.g. `ENGINE__QUALITY__MIN_COUNT=4` or
// `ENGINE__STAGES__MAX_ATTEMPTS=2`. A tier override has to set all three
// tier fields. Provider chains come from
// `ANALYSIS_PROVIDERS` / `GENERATION_PROVIDERS` (comma separated ids), and
// operator block patterns from `SAFETY_BLOCK_PATTERNS` (comma separated,
// case-insensitive regexes).

use std::time::Duration;

use content_safety_rs::{ContentCategory, FilterError, SafetyRater};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Budget and fan-out of one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub budget_ms: u64,
    /// Maximum concurrent generation calls
    pub fan_out: usize,
    /// Typical end-to-end latency, reported to callers
    pub expected_ms: u64,
}

impl TierConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub fast: TierConfig,
    pub standard: TierConfig,
    pub comprehensive: TierConfig,
    /// No session may run longer than this, whatever the caller asks for
    pub hard_ceiling_ms: u64,
    /// Extension requests above this size (image bytes + context) get `standard`
    pub extension_size_threshold_bytes: usize,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            fast: TierConfig {
                budget_ms: 1_000,
                fan_out: 1,
                expected_ms: 800,
            },
            standard: TierConfig {
                budget_ms: 3_000,
                fan_out: 1,
                expected_ms: 2_500,
            },
            comprehensive: TierConfig {
                budget_ms: 8_000,
                fan_out: 2,
                expected_ms: 6_000,
            },
            hard_ceiling_ms: 15_000,
            extension_size_threshold_bytes: 500 * 1024,
        }
    }
}

/// Stage budgets and recovery limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Share of the session budget available to analysis
    pub analysis_share: f64,
    /// Share of the session budget available to generation
    pub generation_share: f64,
    /// Upper bound of a single provider call
    pub provider_call_timeout_ms: u64,
    /// Attempts per stage across all providers
    pub max_attempts: u32,
    /// Seed for the observed average call time
    pub average_call_ms: u64,
    /// Candidates requested from the generation provider
    pub generation_count: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            analysis_share: 0.4,
            generation_share: 0.5,
            provider_call_timeout_ms: 5_000,
            max_attempts: 3,
            average_call_ms: 600,
            generation_count: 5,
        }
    }
}

/// Composite score weights. Safety enters as `rating / 10`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub personalization: f64,
    pub engagement: f64,
    pub appropriateness: f64,
    pub creativity: f64,
    pub safety: f64,
    pub contextual_relevance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            personalization: 0.3,
            engagement: 0.25,
            appropriateness: 0.2,
            creativity: 0.15,
            safety: 0.1,
            contextual_relevance: 0.0,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.personalization
            + self.engagement
            + self.appropriateness
            + self.creativity
            + self.safety
            + self.contextual_relevance
    }

    fn all(&self) -> [f64; 6] {
        [
            self.personalization,
            self.engagement,
            self.appropriateness,
            self.creativity,
            self.safety,
            self.contextual_relevance,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub weights: ScoreWeights,
    pub composite_threshold: f64,
    pub min_count: usize,
    pub max_count: usize,
    pub min_text_len: usize,
    pub max_text_len: usize,
    /// Hard safety floor on the 0-10 scale
    pub safety_floor: u8,
    /// How far a risk tolerance of 0 raises the floor
    pub risk_floor_span: f64,
    /// Operator block list; a match costs `block_penalty` rating points
    pub block_patterns: Vec<String>,
    pub block_penalty: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            composite_threshold: 0.5,
            min_count: 3,
            max_count: 6,
            min_text_len: 10,
            max_text_len: 280,
            safety_floor: 6,
            risk_floor_span: 2.0,
            block_patterns: Vec::new(),
            block_penalty: ContentCategory::Custom.default_penalty(),
        }
    }
}

impl QualityConfig {
    /// The default filters plus the operator block list
    pub fn safety_rater(&self) -> Result<SafetyRater, FilterError> {
        self.block_patterns
            .iter()
            .try_fold(SafetyRater::new(), |rater, pattern| rater.with_block_pattern(pattern))?
            .with_penalty(ContentCategory::Custom, self.block_penalty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a terminal session stays readable
    pub ttl_secs: u64,
    /// How long a cancelled session stays readable
    pub cancelled_retention_secs: u64,
    pub sweep_interval_secs: u64,
    /// Advertised to pollers
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            cancelled_retention_secs: 60,
            sweep_interval_secs: 30,
            poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 600,
            max_entries: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderChains {
    /// Analysis providers, primary first
    pub analysis: Vec<String>,
    /// Generation providers, primary first
    pub generation: Vec<String>,
    pub max_in_flight: usize,
}

impl Default for ProviderChains {
    fn default() -> Self {
        Self {
            analysis: vec!["analysis".to_string()],
            generation: vec!["generation".to_string()],
            max_in_flight: provider_gateway_rs::DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tiers: TiersConfig,
    pub stages: StageConfig,
    pub quality: QualityConfig,
    pub sessions: SessionConfig,
    pub cache: CacheConfig,
    pub providers: ProviderChains,
}

impl EngineConfig {
    /// Loads defaults overlaid with `ENGINE__*` variables and the provider
    /// chain lists, then validates.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("ENGINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let mut engine: EngineConfig = settings.try_deserialize()?;

        let analysis = config_rs::env_list("ANALYSIS_PROVIDERS");
        if !analysis.is_empty() {
            engine.providers.analysis = analysis;
        }
        let generation = config_rs::env_list("GENERATION_PROVIDERS");
        if !generation.is_empty() {
            engine.providers.generation = generation;
        }
        let blocked = config_rs::env_list("SAFETY_BLOCK_PATTERNS");
        if !blocked.is_empty() {
            engine.quality.block_patterns = blocked;
        }

        engine.validate()?;
        Ok(engine)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidValue(msg));

        let tiers = &self.tiers;
        if !(tiers.fast.budget_ms > 0
            && tiers.fast.budget_ms <= tiers.standard.budget_ms
            && tiers.standard.budget_ms <= tiers.comprehensive.budget_ms)
        {
            return invalid("tier budgets must be positive and ordered fast <= standard <= comprehensive".into());
        }
        if tiers.comprehensive.budget_ms > tiers.hard_ceiling_ms {
            return invalid(format!(
                "comprehensive budget {}ms exceeds hard ceiling {}ms",
                tiers.comprehensive.budget_ms, tiers.hard_ceiling_ms
            ));
        }
        if [&tiers.fast, &tiers.standard, &tiers.comprehensive]
            .iter()
            .any(|t| t.fan_out == 0)
        {
            return invalid("tier fan-out must be at least 1".into());
        }

        let stages = &self.stages;
        for (name, share) in [("analysis_share", stages.analysis_share), ("generation_share", stages.generation_share)] {
            if !(share > 0.0 && share <= 1.0) {
                return invalid(format!("{} must be in (0, 1], got {}", name, share));
            }
        }
        if stages.analysis_share + stages.generation_share > 1.0 {
            return invalid("stage shares must not exceed the session budget".into());
        }
        if stages.max_attempts == 0 || stages.provider_call_timeout_ms == 0 || stages.generation_count == 0 {
            return invalid("max_attempts, provider_call_timeout_ms and generation_count must be positive".into());
        }

        let quality = &self.quality;
        if quality.weights.all().iter().any(|w| *w < 0.0 || !w.is_finite()) || quality.weights.total() <= 0.0 {
            return invalid("score weights must be non-negative with a positive sum".into());
        }
        if !(0.0..=1.0).contains(&quality.composite_threshold) {
            return invalid(format!("composite_threshold must be in [0, 1], got {}", quality.composite_threshold));
        }
        if quality.min_count == 0 || quality.min_count > quality.max_count {
            return invalid(format!(
                "min_count ({}) must be positive and not above max_count ({})",
                quality.min_count, quality.max_count
            ));
        }
        if quality.min_count > crate::fallback::smallest_pool() {
            return invalid(format!(
                "min_count ({}) exceeds the static fallback pool ({})",
                quality.min_count,
                crate::fallback::smallest_pool()
            ));
        }
        if quality.min_text_len > quality.max_text_len {
            return invalid("min_text_len must not exceed max_text_len".into());
        }
        if quality.safety_floor > content_safety_rs::MAX_RATING || quality.risk_floor_span < 0.0 {
            return invalid("safety_floor must be within 0-10 and risk_floor_span non-negative".into());
        }
        if let Err(e) = quality.safety_rater() {
            return invalid(e.to_string());
        }

        if self.providers.analysis.is_empty() || self.providers.generation.is_empty() {
            return invalid("both provider chains need at least one provider".into());
        }
        if self.sessions.sweep_interval_secs == 0 {
            return invalid("sweep_interval_secs must be positive".into());
        }
        Ok(())
    }

    pub fn hard_ceiling(&self) -> Duration {
        Duration::from_millis(self.tiers.hard_ceiling_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.sessions.ttl_secs)
    }

    pub fn cancelled_retention(&self) -> Duration {
        Duration::from_secs(self.sessions.cancelled_retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.quality.weights.total() - 1.0).abs() < 1e-9);
        assert_eq!(config.tiers.comprehensive.fan_out, 2);
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        let mut config = EngineConfig::default();
        config.quality.min_count = 7;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = EngineConfig::default();
        config.quality.max_count = 10;
        config.quality.min_count = 7;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("static fallback pool"), "{}", err);

        let mut config = EngineConfig::default();
        config.quality.min_count = 6;
        assert!(config.validate().is_ok());

        let mut config = EngineConfig::default();
        config.stages.analysis_share = 0.7;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.tiers.comprehensive.budget_ms = 20_000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.providers.generation.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_block_list_builds_rater() {
        let mut config = EngineConfig::default();
        config.quality.block_patterns = vec![r"\bcrypto\b".into()];
        config.quality.block_penalty = 10;
        assert!(config.validate().is_ok());
        let rater = config.quality.safety_rater().unwrap();
        assert_eq!(rater.rate("Want to talk about Crypto?").rating, 0);

        config.quality.block_patterns.push("(unclosed".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("(unclosed"), "{}", err);

        let mut config = EngineConfig::default();
        config.quality.block_penalty = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("ENGINE__QUALITY__MIN_COUNT", "4");
        std::env::set_var("ENGINE__STAGES__AVERAGE_CALL_MS", "450");
        let config = EngineConfig::from_env().unwrap();
        std::env::remove_var("ENGINE__QUALITY__MIN_COUNT");
        std::env::remove_var("ENGINE__STAGES__AVERAGE_CALL_MS");

        assert_eq!(config.quality.min_count, 4);
        assert_eq!(config.stages.average_call_ms, 450);
        assert_eq!(config.quality.max_count, 6);
    }
}
