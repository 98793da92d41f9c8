// suggestion-engine-rs/src/classifier.rs
//
// Error Classifier: a pure table from an upstream failure to a recovery
// action. Callers cap attempts per stage; the classifier only looks at the
// attempt count for the current provider.

use std::fmt;
use std::time::Duration;

use provider_gateway_rs::{UpstreamError, UpstreamErrorKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "delay_ms")]
pub enum RecoveryAction {
    Retry,
    #[serde(with = "millis")]
    RetryWithBackoff(Duration),
    SwitchProvider,
    DegradeToCache,
    EmergencyFallback,
    Fail,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::RetryWithBackoff(_) => "retry_with_backoff",
            Self::SwitchProvider => "switch_provider",
            Self::DegradeToCache => "degrade_to_cache",
            Self::EmergencyFallback => "emergency_fallback",
            Self::Fail => "fail",
        }
    }

    /// Whether the stage loop stops on this action
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DegradeToCache | Self::EmergencyFallback | Self::Fail)
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryWithBackoff(delay) => write!(f, "retry_with_backoff({}ms)", delay.as_millis()),
            other => f.write_str(other.as_str()),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    pub action: RecoveryAction,
    pub reason: String,
}

impl RecoveryDecision {
    fn new(action: RecoveryAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }
}

/// Inputs of the policy beyond the error itself
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierPolicy {
    /// Observed average provider call time
    pub average_call_ms: u64,
    /// Another provider is configured for this stage
    pub alternate_available: bool,
    /// Attempts below this may retry timeouts, malformed and unknown errors
    pub retry_limit: u32,
    /// A timeout is only retried when this many average calls still fit
    pub timeout_headroom: f64,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            average_call_ms: 600,
            alternate_available: false,
            retry_limit: 2,
            timeout_headroom: 1.5,
        }
    }
}

/// Maps an upstream failure to a recovery decision.
///
/// | kind | condition | action |
/// |---|---|---|
/// | timeout | attempts < 2 and enough budget left | retry |
/// | timeout | otherwise | degrade to cache |
/// | rate limited | hint fits the remaining budget | backoff by hint |
/// | rate limited | otherwise | switch provider, else emergency fallback |
/// | malformed | attempts < 2 | retry |
/// | malformed | otherwise | emergency fallback |
/// | auth failure | always | fail |
/// | unavailable | alternate configured | switch provider |
/// | unavailable | otherwise | emergency fallback |
/// | unknown | attempts < 2 | retry |
/// | unknown | otherwise | emergency fallback |
pub fn classify(
    error: &UpstreamError,
    attempts_so_far: u32,
    remaining_budget_ms: u64,
    policy: &ClassifierPolicy,
) -> RecoveryDecision {
    use RecoveryAction::*;

    let can_retry = attempts_so_far < policy.retry_limit;
    let fallback_without_alternate = |reason: &str| {
        if policy.alternate_available {
            RecoveryDecision::new(SwitchProvider, format!("{}; switching to alternate provider", reason))
        } else {
            RecoveryDecision::new(EmergencyFallback, format!("{}; no alternate provider configured", reason))
        }
    };

    match error.kind {
        UpstreamErrorKind::Timeout => {
            let needed = policy.average_call_ms as f64 * policy.timeout_headroom;
            if can_retry && remaining_budget_ms as f64 >= needed {
                RecoveryDecision::new(Retry, format!("timeout on attempt {}, budget allows another call", attempts_so_far))
            } else if can_retry {
                RecoveryDecision::new(
                    DegradeToCache,
                    format!("timeout with {}ms left, not enough for another call", remaining_budget_ms),
                )
            } else {
                RecoveryDecision::new(DegradeToCache, format!("timed out {} times", attempts_so_far))
            }
        }
        UpstreamErrorKind::RateLimited => match error.retry_after {
            Some(hint) if (hint.as_millis() as u64) <= remaining_budget_ms => RecoveryDecision::new(
                RetryWithBackoff(hint),
                format!("rate limited, provider asked to wait {}ms", hint.as_millis()),
            ),
            Some(hint) => fallback_without_alternate(&format!(
                "rate limited, wait of {}ms exceeds remaining {}ms",
                hint.as_millis(),
                remaining_budget_ms
            )),
            None => fallback_without_alternate("rate limited without a retry hint"),
        },
        UpstreamErrorKind::MalformedResponse => {
            if can_retry {
                RecoveryDecision::new(Retry, "malformed response, asking again")
            } else {
                RecoveryDecision::new(EmergencyFallback, format!("malformed response {} times", attempts_so_far))
            }
        }
        UpstreamErrorKind::AuthFailure => RecoveryDecision::new(
            Fail,
            format!("provider '{}' rejected our credentials", error.provider),
        ),
        UpstreamErrorKind::ProviderUnavailable => fallback_without_alternate("provider unavailable"),
        UpstreamErrorKind::Unknown => {
            if can_retry {
                RecoveryDecision::new(Retry, "unclassified upstream error, retrying once")
            } else {
                RecoveryDecision::new(EmergencyFallback, format!("unclassified upstream error {} times", attempts_so_far))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: UpstreamErrorKind) -> UpstreamError {
        UpstreamError::new(kind, "primary", "boom")
    }

    fn policy(alternate: bool) -> ClassifierPolicy {
        ClassifierPolicy {
            average_call_ms: 1_000,
            alternate_available: alternate,
            ..Default::default()
        }
    }

    #[test]
    fn test_timeout_rows() {
        let p = policy(false);
        let timeout = err(UpstreamErrorKind::Timeout);
        assert_eq!(classify(&timeout, 1, 1_500, &p).action, RecoveryAction::Retry);
        assert_eq!(classify(&timeout, 1, 1_499, &p).action, RecoveryAction::DegradeToCache);
        assert_eq!(classify(&timeout, 2, 10_000, &p).action, RecoveryAction::DegradeToCache);
    }

    #[test]
    fn test_rate_limit_rows() {
        let hinted = UpstreamError::rate_limited("primary", Some(Duration::from_millis(800)));
        assert_eq!(
            classify(&hinted, 1, 1_000, &policy(false)).action,
            RecoveryAction::RetryWithBackoff(Duration::from_millis(800))
        );
        assert_eq!(
            classify(&hinted, 1, 500, &policy(true)).action,
            RecoveryAction::SwitchProvider
        );
        let bare = UpstreamError::rate_limited("primary", None);
        assert_eq!(
            classify(&bare, 1, 5_000, &policy(false)).action,
            RecoveryAction::EmergencyFallback
        );
    }

    #[test]
    fn test_malformed_and_unknown_rows() {
        for kind in [UpstreamErrorKind::MalformedResponse, UpstreamErrorKind::Unknown] {
            assert_eq!(classify(&err(kind), 1, 5_000, &policy(true)).action, RecoveryAction::Retry);
            assert_eq!(
                classify(&err(kind), 2, 5_000, &policy(true)).action,
                RecoveryAction::EmergencyFallback
            );
        }
    }

    #[test]
    fn test_auth_always_fails() {
        for attempts in 0..4 {
            let decision = classify(&err(UpstreamErrorKind::AuthFailure), attempts, 10_000, &policy(true));
            assert_eq!(decision.action, RecoveryAction::Fail);
            assert!(decision.reason.contains("primary"));
        }
    }

    #[test]
    fn test_unavailable_rows() {
        let unavailable = err(UpstreamErrorKind::ProviderUnavailable);
        assert_eq!(classify(&unavailable, 1, 5_000, &policy(true)).action, RecoveryAction::SwitchProvider);
        assert_eq!(
            classify(&unavailable, 1, 5_000, &policy(false)).action,
            RecoveryAction::EmergencyFallback
        );
    }

    #[test]
    fn test_every_decision_has_a_reason() {
        let kinds = [
            UpstreamErrorKind::Timeout,
            UpstreamErrorKind::RateLimited,
            UpstreamErrorKind::AuthFailure,
            UpstreamErrorKind::MalformedResponse,
            UpstreamErrorKind::ProviderUnavailable,
            UpstreamErrorKind::Unknown,
        ];
        for kind in kinds {
            for attempts in 0..3 {
                let decision = classify(&err(kind), attempts, 2_000, &policy(attempts % 2 == 0));
                assert!(!decision.reason.is_empty());
            }
        }
    }

    #[test]
    fn test_only_fail_is_a_caller_error() {
        assert!(RecoveryAction::Fail.is_terminal());
        assert!(RecoveryAction::DegradeToCache.is_terminal());
        assert!(!RecoveryAction::SwitchProvider.is_terminal());
        assert_eq!(
            RecoveryAction::RetryWithBackoff(Duration::from_millis(250)).to_string(),
            "retry_with_backoff(250ms)"
        );
    }
}
