//! # Suggestion Engine
//!
//! Turns an image plus optional context into ranked conversation
//! suggestions, asynchronously and under a latency budget.
//!
//! ## Flow
//!
//! 1. [`SuggestionEngine::submit`] validates the request, picks a [`Tier`]
//!    and records a `pending` session, returning a [`SessionTicket`] at once.
//! 2. A spawned task runs the [`orchestrator`]: image analysis, then
//!    generation, each stage recovering from provider failures as the
//!    [`classifier`] decides.
//! 3. The [`quality`] stage scores, dedupes, backfills and safety-gates the
//!    candidates before they are written to the session.
//! 4. Callers poll [`SuggestionEngine::get_status`] or follow
//!    [`SuggestionEngine::subscribe`].
//!
//! Upstream failures never surface directly: they show up as degraded
//! (`is_fallback`) results, except credential rejection and budget
//! exhaustion, which end the session in `error`.

pub mod cache;
pub mod candidate;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod fallback;
pub mod manager;
pub mod orchestrator;
pub mod quality;
pub mod request;
pub mod session;
pub mod store;
pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use content_safety_rs::SafetyRater;
use provider_gateway_rs::{HttpProvider, ProviderGateway, ProviderHealth};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

pub use candidate::{CandidateFactory, Suggestion, SuggestionCandidate};
pub use classifier::{classify, ClassifierPolicy, RecoveryAction, RecoveryDecision};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use manager::{SessionHandle, SessionManager};
pub use orchestrator::{Job, Orchestrator};
pub use quality::{QaMetrics, QaOutcome, QualityAssurance};
pub use request::{ClientKind, ProcessingRequest, RequestError, Submission, SuggestionType, Tone};
pub use session::{Phase, PhaseDescriptor, SessionError, SessionStatus, StreamSession};
pub use store::{InMemorySessionStore, SessionStore};
pub use strategy::{StrategySelector, Tier};

/// Returned synchronously when a session is accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTicket {
    pub stream_id: String,
    pub tier: Tier,
    pub estimated_duration_ms: u64,
    pub phases: Vec<PhaseDescriptor>,
    pub poll_interval_ms: u64,
    /// The session fails with a timeout if still running at this point
    pub timeout_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub status: String,
    pub active_sessions: usize,
    pub providers: Vec<ProviderHealth>,
}

#[derive(Debug)]
pub struct SuggestionEngine {
    config: EngineConfig,
    selector: StrategySelector,
    sessions: SessionManager,
    orchestrator: Arc<Orchestrator>,
}

impl SuggestionEngine {
    /// Engine with an in-memory session store and the system clock
    pub fn new(config: EngineConfig, gateway: ProviderGateway) -> Self {
        Self::with_parts(
            config,
            gateway,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn with_parts(
        config: EngineConfig,
        gateway: ProviderGateway,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = SessionManager::new(store, clock, config.sessions.clone(), config.hard_ceiling());
        let rater = config.quality.safety_rater().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring operator block list");
            SafetyRater::new()
        });
        let orchestrator = Orchestrator::new(Arc::new(gateway), config.clone(), CandidateFactory::new(rater));
        Self {
            selector: StrategySelector::new(config.tiers.clone()),
            sessions,
            orchestrator: Arc::new(orchestrator),
            config,
        }
    }

    /// Loads `EngineConfig` from the environment and registers an HTTP
    /// provider for every id in the analysis and generation chains.
    /// Providers without a `PROVIDER_<ID>_URL` are skipped; calls to them
    /// fall back to static suggestions.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = EngineConfig::from_env()?;
        let mut gateway = ProviderGateway::new(config.providers.max_in_flight, None);

        let mut ids: Vec<String> = config
            .providers
            .analysis
            .iter()
            .chain(config.providers.generation.iter())
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();

        for id in ids {
            match HttpProvider::from_env(&id) {
                Some(provider) => {
                    info!(provider = %id, wire = %provider.settings().wire, "Provider configured");
                    gateway.register(id, Arc::new(provider));
                }
                None => warn!(provider = %id, "Provider has no URL configured; its stage will fall back"),
            }
        }

        Ok(Self::new(config, gateway))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Validates a raw submission and starts a session for it
    pub fn submit(&self, submission: Submission, header_kind: Option<ClientKind>) -> Result<SessionTicket, RequestError> {
        let request = ProcessingRequest::from_submission(submission, header_kind)?;
        Ok(self.create(request))
    }

    /// Starts a session for an already validated request. Must be called
    /// from within a tokio runtime.
    pub fn create(&self, request: ProcessingRequest) -> SessionTicket {
        let tier = self.selector.select_tier(&request);
        let budget = self.selector.session_budget(&request, tier);
        let estimated = self.selector.estimated_duration(tier).min(budget);
        let (handle, session) = self.sessions.create(&request.correlation_id, tier, estimated);

        let span = info_span!(
            "session",
            stream_id = %session.id,
            correlation_id = %request.correlation_id,
            tier = %tier
        );
        let job = Job {
            request,
            tier,
            budget,
            fan_out: self.selector.fan_out(tier),
            session: handle,
        };
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(job).await }.instrument(span));

        SessionTicket {
            stream_id: session.id,
            tier,
            estimated_duration_ms: session.estimated_duration_ms,
            phases: session.phases,
            poll_interval_ms: self.config.sessions.poll_interval_ms,
            timeout_at: clock::add(session.created_at, budget),
        }
    }

    pub fn get_status(&self, stream_id: &str) -> Result<StreamSession, SessionError> {
        self.sessions.get_status(stream_id)
    }

    pub fn cancel(&self, stream_id: &str) -> Result<bool, SessionError> {
        self.sessions.cancel(stream_id)
    }

    pub fn subscribe(&self, stream_id: &str) -> Result<watch::Receiver<StreamSession>, SessionError> {
        self.sessions.subscribe(stream_id)
    }

    pub fn health(&self) -> EngineHealth {
        let providers = self.orchestrator.gateway().health();
        let all_closed = providers
            .iter()
            .all(|p| p.circuit.state == error_handling_rs::CircuitState::Closed);
        EngineHealth {
            status: if all_closed { "healthy" } else { "degraded" }.to_string(),
            active_sessions: self.sessions.active_count(),
            providers,
        }
    }

    /// Starts the background expiry sweep
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        store::spawn_sweeper(
            self.sessions.store().clone(),
            self.sessions.clock().clone(),
            Duration::from_secs(self.config.sessions.sweep_interval_secs),
            shutdown,
        )
    }
}
