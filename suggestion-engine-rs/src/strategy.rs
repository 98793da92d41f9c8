// suggestion-engine-rs/src/strategy.rs
//
// Strategy Selector: maps a request and its client hints to a processing
// tier and latency budget. Pure and deterministic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{TierConfig, TiersConfig};
use crate::request::{ClientKind, ProcessingRequest, RequestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Fast,
    Standard,
    Comprehensive,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Fast, Tier::Standard, Tier::Comprehensive];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::Comprehensive => "comprehensive",
        }
    }

    /// Parses an override value. `auto` means no override.
    pub fn parse_override(raw: &str) -> Result<Option<Tier>, RequestError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(None),
            "fast" => Ok(Some(Self::Fast)),
            "standard" => Ok(Some(Self::Standard)),
            "comprehensive" => Ok(Some(Self::Comprehensive)),
            _ => Err(RequestError::UnknownTier(raw.to_string())),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StrategySelector {
    tiers: TiersConfig,
}

impl StrategySelector {
    pub fn new(tiers: TiersConfig) -> Self {
        Self { tiers }
    }

    pub fn tier_config(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Fast => &self.tiers.fast,
            Tier::Standard => &self.tiers.standard,
            Tier::Comprehensive => &self.tiers.comprehensive,
        }
    }

    /// Picks the tier:
    /// 1. a valid explicit override wins;
    /// 2. extension clients get `fast`, or `standard` above the size threshold;
    /// 3. everything else gets `standard`.
    ///
    /// `comprehensive` is only kept when no deadline shorter than its budget
    /// was supplied; otherwise the largest tier fitting the deadline is used,
    /// with `fast` as the floor.
    pub fn select_tier(&self, request: &ProcessingRequest) -> Tier {
        let tier = match (request.tier_override, request.client_kind) {
            (Some(tier), _) => tier,
            (None, ClientKind::Extension) => {
                if request.payload_size() > self.tiers.extension_size_threshold_bytes {
                    Tier::Standard
                } else {
                    Tier::Fast
                }
            }
            (None, ClientKind::InteractiveApp) => Tier::Standard,
        };

        match (tier, request.timeout_override) {
            (Tier::Comprehensive, Some(deadline)) if deadline < self.tiers.comprehensive.budget() => {
                self.largest_fitting(deadline)
            }
            _ => tier,
        }
    }

    fn largest_fitting(&self, deadline: Duration) -> Tier {
        Tier::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| self.tier_config(*tier).budget() <= deadline)
            .unwrap_or(Tier::Fast)
    }

    /// Session budget: the timeout override clamped to the hard ceiling, else
    /// the tier budget.
    pub fn session_budget(&self, request: &ProcessingRequest, tier: Tier) -> Duration {
        let ceiling = Duration::from_millis(self.tiers.hard_ceiling_ms);
        match request.timeout_override {
            Some(timeout) => timeout.min(ceiling),
            None => self.tier_config(tier).budget().min(ceiling),
        }
    }

    pub fn estimated_duration(&self, tier: Tier) -> Duration {
        Duration::from_millis(self.tier_config(tier).expected_ms)
    }

    pub fn fan_out(&self, tier: Tier) -> usize {
        self.tier_config(tier).fan_out.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ImagePayload;

    fn selector() -> StrategySelector {
        StrategySelector::new(TiersConfig::default())
    }

    fn request() -> ProcessingRequest {
        ProcessingRequest::new(ImagePayload::Inline {
            mime: "image/png".into(),
            bytes: vec![0u8; 1024],
        })
    }

    #[test]
    fn test_override_wins() {
        let mut r = request();
        r.tier_override = Some(Tier::Fast);
        assert_eq!(selector().select_tier(&r), Tier::Fast);

        r.client_kind = ClientKind::Extension;
        r.tier_override = Some(Tier::Comprehensive);
        assert_eq!(selector().select_tier(&r), Tier::Comprehensive);
    }

    #[test]
    fn test_extension_size_threshold() {
        let mut r = request();
        r.client_kind = ClientKind::Extension;
        assert_eq!(selector().select_tier(&r), Tier::Fast);

        r.image = ImagePayload::Inline {
            mime: "image/jpeg".into(),
            bytes: vec![0u8; 600 * 1024],
        };
        assert_eq!(selector().select_tier(&r), Tier::Standard);
    }

    #[test]
    fn test_default_is_standard() {
        assert_eq!(selector().select_tier(&request()), Tier::Standard);
    }

    #[test]
    fn test_comprehensive_downgrades_to_fit_deadline() {
        let mut r = request();
        r.tier_override = Some(Tier::Comprehensive);
        r.timeout_override = Some(Duration::from_millis(5_000));
        assert_eq!(selector().select_tier(&r), Tier::Standard);

        r.timeout_override = Some(Duration::from_millis(500));
        assert_eq!(selector().select_tier(&r), Tier::Fast);

        r.timeout_override = Some(Duration::from_millis(9_000));
        assert_eq!(selector().select_tier(&r), Tier::Comprehensive);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let mut r = request();
        r.client_kind = ClientKind::Extension;
        let first = selector().select_tier(&r);
        assert!((0..50).all(|_| selector().select_tier(&r) == first));
    }

    #[test]
    fn test_session_budget_clamped() {
        let s = selector();
        let mut r = request();
        assert_eq!(s.session_budget(&r, Tier::Standard), Duration::from_millis(3_000));

        r.timeout_override = Some(Duration::from_secs(60));
        assert_eq!(s.session_budget(&r, Tier::Standard), Duration::from_millis(15_000));
        assert_eq!(s.estimated_duration(Tier::Fast), Duration::from_millis(800));
        assert_eq!(s.fan_out(Tier::Comprehensive), 2);
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(Tier::parse_override("AUTO"), Ok(None));
        assert_eq!(Tier::parse_override("fast"), Ok(Some(Tier::Fast)));
        assert!(Tier::parse_override("ludicrous").is_err());
    }
}
