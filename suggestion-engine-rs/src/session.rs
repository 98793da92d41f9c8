// suggestion-engine-rs/src/session.rs
//
// StreamSession state machine.
//
//   pending -> analyzing -> generating -> validating -> completed
//                  |             |                  \-> needs_more_input
//                  \-------------+--> error | cancelled
//
// Progress never decreases while the session is live; terminal sessions
// accept no further writes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::Suggestion;
use crate::quality::QaMetrics;
use crate::strategy::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Analyzing,
    Generating,
    Validating,
    Completed,
    NeedsMoreInput,
    Error,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::NeedsMoreInput | Self::Error | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Completed => "completed",
            Self::NeedsMoreInput => "needs_more_input",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Stream {0} not found")]
    NotFound(String),

    #[error("Stream {id} is already {status}")]
    Terminal { id: String, status: SessionStatus },

    #[error("Stream {0} already exists")]
    Duplicate(String),
}

/// A named slice of the 0-100 progress range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDescriptor {
    pub name: String,
    pub progress_range: [u8; 2],
}

/// The four processing phases and their progress bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ImageAnalysis,
    ContextProcessing,
    SuggestionGeneration,
    QualityValidation,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::ImageAnalysis,
        Phase::ContextProcessing,
        Phase::SuggestionGeneration,
        Phase::QualityValidation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ImageAnalysis => "image_analysis",
            Self::ContextProcessing => "context_processing",
            Self::SuggestionGeneration => "suggestion_generation",
            Self::QualityValidation => "quality_validation",
        }
    }

    pub fn band(self) -> (u8, u8) {
        match self {
            Self::ImageAnalysis => (0, 30),
            Self::ContextProcessing => (30, 50),
            Self::SuggestionGeneration => (50, 80),
            Self::QualityValidation => (80, 100),
        }
    }

    /// Session status while this phase runs
    pub fn status(self) -> SessionStatus {
        match self {
            Self::ImageAnalysis | Self::ContextProcessing => SessionStatus::Analyzing,
            Self::SuggestionGeneration => SessionStatus::Generating,
            Self::QualityValidation => SessionStatus::Validating,
        }
    }

    pub fn descriptors() -> Vec<PhaseDescriptor> {
        Self::ALL
            .iter()
            .map(|phase| {
                let (lo, hi) = phase.band();
                PhaseDescriptor {
                    name: phase.name().to_string(),
                    progress_range: [lo, hi],
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: String,
    pub correlation_id: String,
    pub status: SessionStatus,
    pub progress: u8,
    pub current_phase: Option<String>,
    pub phases: Vec<PhaseDescriptor>,
    pub tier: Tier,
    pub estimated_duration_ms: u64,
    /// Results came from cached or static content
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub suggestions: Option<Vec<Suggestion>>,
    pub error: Option<String>,
    pub guidance_message: Option<String>,
    pub qa_metrics: Option<QaMetrics>,
}

impl StreamSession {
    pub fn new(
        id: String,
        correlation_id: String,
        tier: Tier,
        estimated_duration_ms: u64,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            correlation_id,
            status: SessionStatus::Pending,
            progress: 0,
            current_phase: None,
            phases: Phase::descriptors(),
            tier,
            estimated_duration_ms,
            degraded: false,
            created_at: now,
            updated_at: now,
            expires_at,
            suggestions: None,
            error: None,
            guidance_message: None,
            qa_metrics: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves into `phase` at `progress` (clamped into the phase band). Progress
    /// never goes backwards.
    pub fn enter(&mut self, phase: Phase, progress: u8, now: DateTime<Utc>) {
        let (lo, hi) = phase.band();
        self.status = phase.status();
        self.current_phase = Some(phase.name().to_string());
        self.progress = self.progress.max(progress.clamp(lo, hi));
        self.updated_at = now;
    }

    /// Terminal transition; the caller sets the payload fields
    pub fn finish(&mut self, status: SessionStatus, now: DateTime<Utc>, expires_at: DateTime<Utc>) {
        self.status = status;
        if status == SessionStatus::Completed || status == SessionStatus::NeedsMoreInput {
            self.progress = 100;
        }
        self.updated_at = now;
        self.expires_at = expires_at;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> StreamSession {
        let now = Utc::now();
        StreamSession::new("s1".into(), "c1".into(), Tier::Fast, 800, now, now)
    }

    #[test]
    fn test_phase_bands_cover_range() {
        let phases = Phase::descriptors();
        assert_eq!(phases.len(), 4);
        assert_eq!(phases[0].progress_range, [0, 30]);
        assert_eq!(phases[3].progress_range, [80, 100]);
        for pair in phases.windows(2) {
            assert_eq!(pair[0].progress_range[1], pair[1].progress_range[0]);
        }
    }

    #[test]
    fn test_progress_is_monotonic_and_banded() {
        let mut s = session();
        let now = Utc::now();
        s.enter(Phase::SuggestionGeneration, 10, now);
        assert_eq!(s.progress, 50);
        assert_eq!(s.status, SessionStatus::Generating);

        s.enter(Phase::ContextProcessing, 35, now);
        assert_eq!(s.progress, 50);
        assert_eq!(s.current_phase.as_deref(), Some("context_processing"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::NeedsMoreInput.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Validating.is_terminal());

        let mut s = session();
        let now = Utc::now();
        s.finish(SessionStatus::Completed, now, now);
        assert_eq!(s.progress, 100);
        assert!(s.is_terminal());
    }
}
