// suggestion-engine-rs/src/orchestrator.rs
//
// Two-Stage Orchestrator. One task per session drives
//
//   analysis -> context merge -> generation -> quality validation
//
// Each provider stage loops over its provider chain, asking the classifier
// what to do after every failure, until it succeeds or reaches a terminal
// decision. Budgets nest: session > stage > call.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use metrics::{counter, histogram};
use provider_gateway_rs::{
    AnalysisRequest, GenerationRequest, ProviderGateway, RawSuggestion, UpstreamError, UpstreamErrorKind,
};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::candidate::{CandidateFactory, SuggestionCandidate};
use crate::classifier::{classify, ClassifierPolicy, RecoveryAction};
use crate::config::EngineConfig;
use crate::fallback::static_candidates;
use crate::manager::SessionHandle;
use crate::quality::{QaOutcome, QualityAssurance};
use crate::request::ProcessingRequest;
use crate::session::Phase;
use crate::strategy::Tier;

/// Sent when the analysis provider asks for more input without saying what
pub const DEFAULT_GUIDANCE: &str =
    "We couldn't read enough from this image. Try a screenshot that shows the profile or conversation clearly.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Analysis,
    Generation,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Generation => "generation",
        }
    }
}

/// How a provider stage ended
#[derive(Debug)]
enum StageOutcome<T> {
    Done(T),
    /// Degrade-to-cache or emergency fallback
    Degraded { action: RecoveryAction, reason: String },
    Failed(UpstreamError),
    Cancelled,
}

/// How a whole session ended
#[derive(Debug)]
enum Finish {
    Completed { outcome: QaOutcome, degraded: bool },
    NeedsMoreInput(String),
    Failed(String),
    Cancelled,
}

/// Exponential moving average of successful provider call times
#[derive(Debug)]
pub struct LatencyTracker {
    average_ms: Mutex<f64>,
}

impl LatencyTracker {
    const ALPHA: f64 = 0.2;

    pub fn new(seed_ms: u64) -> Self {
        Self {
            average_ms: Mutex::new(seed_ms as f64),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let mut average = self.average_ms.lock().unwrap_or_else(PoisonError::into_inner);
        *average = Self::ALPHA * elapsed.as_millis() as f64 + (1.0 - Self::ALPHA) * *average;
    }

    pub fn average_ms(&self) -> u64 {
        self.average_ms.lock().unwrap_or_else(PoisonError::into_inner).round() as u64
    }
}

/// Everything one session run needs
#[derive(Debug)]
pub struct Job {
    pub request: ProcessingRequest,
    pub tier: Tier,
    pub budget: Duration,
    pub fan_out: usize,
    pub session: SessionHandle,
}

#[derive(Debug)]
pub struct Orchestrator {
    gateway: Arc<ProviderGateway>,
    config: EngineConfig,
    qa: QualityAssurance,
    factory: CandidateFactory,
    cache: ResultCache,
    latency: LatencyTracker,
}

impl Orchestrator {
    pub fn new(gateway: Arc<ProviderGateway>, config: EngineConfig, factory: CandidateFactory) -> Self {
        Self {
            qa: QualityAssurance::new(config.quality.clone(), factory.clone()),
            cache: ResultCache::new(&config.cache),
            latency: LatencyTracker::new(config.stages.average_call_ms),
            gateway,
            factory,
            config,
        }
    }

    pub fn gateway(&self) -> &Arc<ProviderGateway> {
        &self.gateway
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Runs the pipeline for one session and writes its terminal state.
    /// The whole run is bounded by the session budget.
    pub async fn run(&self, job: Job) {
        let started = Instant::now();
        let session_deadline = started + job.budget;
        let cancel = job.session.cancel_token().clone();

        let finish = within_budget(job.tier, job.budget, &cancel, self.pipeline(&job, session_deadline)).await;

        histogram!(
            "session_duration_ms",
            started.elapsed().as_millis() as f64,
            "tier" => job.tier.as_str()
        );
        self.write(&job, finish);
    }

    fn write(&self, job: &Job, finish: Finish) {
        let session = &job.session;
        let written = match finish {
            Finish::Completed { outcome, degraded } => {
                info!(
                    suggestions = outcome.metrics.final_count,
                    backfilled = outcome.metrics.backfilled,
                    degraded,
                    "Session completed"
                );
                session.complete(outcome.suggestions, outcome.metrics, degraded)
            }
            Finish::NeedsMoreInput(guidance) => {
                info!("Session needs more input");
                session.needs_more_input(&guidance)
            }
            Finish::Failed(message) => {
                warn!(error = %message, "Session failed");
                session.fail(&message)
            }
            Finish::Cancelled => {
                info!("Session cancelled, discarding results");
                return;
            }
        };
        if let Err(e) = written {
            debug!(error = %e, "Terminal write refused");
        }
    }

    async fn pipeline(&self, job: &Job, session_deadline: Instant) -> Finish {
        let request = &job.request;
        let session = &job.session;
        let cancel = session.cancel_token();

        if session.enter(Phase::ImageAnalysis, 0).is_err() {
            return Finish::Cancelled;
        }

        // Analysis
        let analysis_request = AnalysisRequest {
            image: request.image.to_wire(),
            context_hint: request.context.clone(),
        };
        let gateway = self.gateway.clone();
        let deadline = self.stage_deadline(Stage::Analysis, job.budget, session_deadline);
        let analysis = self
            .run_stage(
                Stage::Analysis,
                &self.config.providers.analysis,
                deadline,
                cancel,
                move |provider, budget| {
                    let gateway = gateway.clone();
                    let analysis_request = analysis_request.clone();
                    async move { gateway.analyze(&provider, &analysis_request, budget).await }
                },
            )
            .await;

        let mut fallback = None;
        let signals = match analysis {
            StageOutcome::Done(response) if response.needs_more_input => {
                let guidance = response
                    .guidance_message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_GUIDANCE.to_string());
                return Finish::NeedsMoreInput(guidance);
            }
            StageOutcome::Done(response) => {
                debug!(confidence = response.confidence, "Image analysis finished");
                Some(response.extracted_signals)
            }
            StageOutcome::Degraded { action, reason } => {
                warn!(%action, %reason, "Analysis degraded, skipping generation");
                fallback = Some(action);
                None
            }
            StageOutcome::Failed(error) => return Finish::Failed(failure_message(&error)),
            StageOutcome::Cancelled => return Finish::Cancelled,
        };

        // Context processing: merge extracted signals with the caller's context
        if session.enter(Phase::ContextProcessing, 30).is_err() {
            return Finish::Cancelled;
        }
        let generation_request = signals.map(|signals| GenerationRequest {
            signals,
            tone: request.tone.to_string(),
            suggestion_type: request.suggestion_type.to_string(),
            preferences: request.preferences.to_hints(),
            context: request.context.clone(),
            count: self.config.stages.generation_count,
        });

        // Generation
        if session.enter(Phase::SuggestionGeneration, 50).is_err() {
            return Finish::Cancelled;
        }
        let candidates = match generation_request {
            Some(generation_request) => {
                let gateway = self.gateway.clone();
                let chain = self.config.providers.generation.clone();
                let fan_out = job.fan_out;
                let deadline = self.stage_deadline(Stage::Generation, job.budget, session_deadline);
                let generated = self
                    .run_stage(
                        Stage::Generation,
                        &self.config.providers.generation,
                        deadline,
                        cancel,
                        move |provider, budget| {
                            generate_fanned(
                                gateway.clone(),
                                chain.clone(),
                                provider,
                                generation_request.clone(),
                                budget,
                                fan_out,
                            )
                        },
                    )
                    .await;

                match generated {
                    StageOutcome::Done(raw) => raw
                        .into_iter()
                        .map(|raw| self.factory.from_raw(raw, request))
                        .collect(),
                    StageOutcome::Degraded { action, reason } => {
                        warn!(%action, %reason, "Generation degraded");
                        fallback = Some(action);
                        self.fallback_candidates(action, request, job.tier)
                    }
                    StageOutcome::Failed(error) => return Finish::Failed(failure_message(&error)),
                    StageOutcome::Cancelled => return Finish::Cancelled,
                }
            }
            None => self.fallback_candidates(fallback.unwrap_or(RecoveryAction::EmergencyFallback), request, job.tier),
        };

        // Quality validation
        if cancel.is_cancelled() || session.enter(Phase::QualityValidation, 80).is_err() {
            return Finish::Cancelled;
        }
        let degraded = fallback.is_some();
        if !degraded {
            self.cache.store(&request.fingerprint(), job.tier, candidates.clone());
        }
        let outcome = self.qa.validate(candidates, request);
        Finish::Completed { outcome, degraded }
    }

    fn stage_deadline(&self, stage: Stage, session_budget: Duration, session_deadline: Instant) -> Instant {
        let share = match stage {
            Stage::Analysis => self.config.stages.analysis_share,
            Stage::Generation => self.config.stages.generation_share,
        };
        let stage_budget = session_budget.mul_f64(share.clamp(0.0, 1.0));
        (Instant::now() + stage_budget).min(session_deadline)
    }

    /// Cached candidates when degrading to cache and one is available,
    /// otherwise the static pool
    fn fallback_candidates(&self, action: RecoveryAction, request: &ProcessingRequest, tier: Tier) -> Vec<SuggestionCandidate> {
        if action == RecoveryAction::DegradeToCache {
            if let Some(hit) = self.cache.lookup(&request.fingerprint(), tier) {
                counter!("fallback_served_total", 1, "source" => "cache");
                return hit;
            }
        }
        counter!("fallback_served_total", 1, "source" => "static");
        static_candidates(&self.factory, request.suggestion_type, request.tone)
    }

    /// Calls providers along `chain` until one succeeds or the classifier
    /// ends the stage. Running out of stage budget or attempts counts as
    /// degrade-to-cache.
    async fn run_stage<T, F, Fut>(
        &self,
        stage: Stage,
        chain: &[String],
        deadline: Instant,
        cancel: &CancellationToken,
        mut call: F,
    ) -> StageOutcome<T>
    where
        F: FnMut(String, Duration) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let call_cap = Duration::from_millis(self.config.stages.provider_call_timeout_ms);
        let mut index = 0;
        let mut attempts = 0;
        let mut provider_attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return StageOutcome::Cancelled;
            }
            let Some(provider) = chain.get(index).cloned() else {
                return StageOutcome::Degraded {
                    action: RecoveryAction::EmergencyFallback,
                    reason: "provider chain exhausted".into(),
                };
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return StageOutcome::Degraded {
                    action: RecoveryAction::DegradeToCache,
                    reason: "stage budget exhausted".into(),
                };
            }
            if attempts >= self.config.stages.max_attempts {
                return StageOutcome::Degraded {
                    action: RecoveryAction::DegradeToCache,
                    reason: format!("{} attempts used", attempts),
                };
            }

            attempts += 1;
            provider_attempts += 1;
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StageOutcome::Cancelled,
                result = call(provider.clone(), remaining.min(call_cap)) => result,
            };

            let error = match result {
                Ok(value) => {
                    self.latency.record(started.elapsed());
                    debug!(stage = stage.as_str(), provider = %provider, attempts, "Stage succeeded");
                    return StageOutcome::Done(value);
                }
                Err(error) => error,
            };

            let policy = ClassifierPolicy {
                average_call_ms: self.latency.average_ms(),
                alternate_available: index + 1 < chain.len(),
                ..Default::default()
            };
            let remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
            let decision = classify(&error, provider_attempts, remaining_ms, &policy);

            counter!(
                "recovery_decisions_total",
                1,
                "stage" => stage.as_str(),
                "action" => decision.action.as_str()
            );
            warn!(
                stage = stage.as_str(),
                provider = %provider,
                kind = %error.kind,
                attempt = attempts,
                action = %decision.action,
                reason = %decision.reason,
                "Provider call failed"
            );

            match decision.action {
                RecoveryAction::Retry => {}
                RecoveryAction::RetryWithBackoff(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return StageOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RecoveryAction::SwitchProvider => {
                    index += 1;
                    provider_attempts = 0;
                }
                RecoveryAction::DegradeToCache | RecoveryAction::EmergencyFallback => {
                    return StageOutcome::Degraded {
                        action: decision.action,
                        reason: decision.reason,
                    };
                }
                RecoveryAction::Fail => return StageOutcome::Failed(error),
            }
        }
    }
}

/// Stage deadlines normally end the pipeline first; this is the backstop
/// for anything that overruns the session budget.
async fn within_budget<F>(tier: Tier, budget: Duration, cancel: &CancellationToken, pipeline: F) -> Finish
where
    F: Future<Output = Finish>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Finish::Cancelled,
        outcome = tokio::time::timeout(budget, pipeline) => match outcome {
            Ok(finish) => finish,
            Err(_) => {
                counter!("session_timeouts_total", 1, "tier" => tier.as_str());
                Finish::Failed(timeout_message(budget))
            }
        },
    }
}

fn timeout_message(budget: Duration) -> String {
    format!(
        "Suggestion processing timed out after {}ms. Please try again.",
        budget.as_millis()
    )
}

fn failure_message(error: &UpstreamError) -> String {
    match error.kind {
        UpstreamErrorKind::AuthFailure => format!(
            "Suggestion service is misconfigured: upstream provider rejected our credentials ({}). This is not retryable.",
            error.provider
        ),
        _ => format!("Suggestion provider {} failed: {}", error.provider, error.message),
    }
}

async fn generate_once(
    gateway: &ProviderGateway,
    provider: &str,
    request: &GenerationRequest,
    budget: Duration,
) -> Result<Vec<RawSuggestion>, UpstreamError> {
    let suggestions = gateway.generate(provider, request, budget).await?;
    if suggestions.is_empty() {
        return Err(UpstreamError::malformed(provider, "provider returned no suggestions", "[]"));
    }
    Ok(suggestions)
}

/// On the primary provider, issues `fan_out` concurrent calls spread over
/// the chain and merges whatever succeeds. Other providers get one call.
async fn generate_fanned(
    gateway: Arc<ProviderGateway>,
    chain: Vec<String>,
    provider: String,
    request: GenerationRequest,
    budget: Duration,
    fan_out: usize,
) -> Result<Vec<RawSuggestion>, UpstreamError> {
    let primary = chain.first() == Some(&provider);
    if !primary || fan_out <= 1 {
        return generate_once(&gateway, &provider, &request, budget).await;
    }

    let mut calls = JoinSet::new();
    for target in chain.iter().cycle().take(fan_out).cloned() {
        let gateway = gateway.clone();
        let request = request.clone();
        calls.spawn(async move { generate_once(&gateway, &target, &request, budget).await });
    }

    let mut merged = Vec::new();
    let mut first_error = None;
    while let Some(joined) = calls.join_next().await {
        match joined {
            Ok(Ok(suggestions)) => merged.extend(suggestions),
            Ok(Err(error)) => {
                first_error.get_or_insert(error);
            }
            Err(join_error) => {
                first_error.get_or_insert_with(|| {
                    UpstreamError::new(
                        UpstreamErrorKind::Unknown,
                        &provider,
                        format!("generation task failed: {}", join_error),
                    )
                });
            }
        }
    }

    if merged.is_empty() {
        return Err(first_error
            .unwrap_or_else(|| UpstreamError::malformed(&provider, "provider returned no suggestions", "[]")));
    }
    debug!(fan_out, merged = merged.len(), "Merged fan-out generation results");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_tracker_moves_towards_samples() {
        let tracker = LatencyTracker::new(600);
        tracker.record(Duration::from_millis(100));
        assert_eq!(tracker.average_ms(), 500);
        for _ in 0..50 {
            tracker.record(Duration::from_millis(100));
        }
        assert_eq!(tracker.average_ms(), 100);
    }

    #[test]
    fn test_auth_failure_message() {
        let error = UpstreamError::new(UpstreamErrorKind::AuthFailure, "generation", "401");
        assert_eq!(
            failure_message(&error),
            "Suggestion service is misconfigured: upstream provider rejected our credentials (generation). This is not retryable."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_pipeline_fails_at_budget() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let finish = within_budget(
            Tier::Fast,
            Duration::from_millis(1_500),
            &cancel,
            std::future::pending::<Finish>(),
        )
        .await;

        assert!(started.elapsed() >= Duration::from_millis(1_500));
        match finish {
            Finish::Failed(message) => {
                assert_eq!(message, "Suggestion processing timed out after 1500ms. Please try again.")
            }
            other => panic!("expected a timeout failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_beats_budget_and_fast_pipelines_pass_through() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        });
        let finish = within_budget(
            Tier::Standard,
            Duration::from_secs(5),
            &cancel,
            std::future::pending::<Finish>(),
        )
        .await;
        assert!(matches!(finish, Finish::Cancelled));

        let finish = within_budget(
            Tier::Standard,
            Duration::from_secs(5),
            &CancellationToken::new(),
            async { Finish::NeedsMoreInput("closer crop please".into()) },
        )
        .await;
        assert!(matches!(finish, Finish::NeedsMoreInput(ref m) if m == "closer crop please"));
    }

    #[tokio::test]
    async fn test_fan_out_merges_partial_success() {
        use provider_gateway_rs::scripted::{Reply, ScriptedProvider};
        use serde_json::json;

        let primary = Arc::new(
            ScriptedProvider::always(Reply::Json(json!([{"text": "What trail was that?"}])))
                .then(Reply::Fail(UpstreamError::unavailable("primary", "down"))),
        );
        let gateway = Arc::new(ProviderGateway::default().with_provider("primary", primary.clone()));
        let request = GenerationRequest {
            signals: Default::default(),
            tone: "playful".into(),
            suggestion_type: "opener".into(),
            preferences: Default::default(),
            context: None,
            count: 5,
        };

        let merged = generate_fanned(
            gateway,
            vec!["primary".into()],
            "primary".into(),
            request,
            Duration::from_secs(1),
            3,
        )
        .await
        .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(primary.calls(), 3);
    }
}
