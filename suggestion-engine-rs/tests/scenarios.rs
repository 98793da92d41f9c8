//! End-to-end session scenarios against scripted providers. The tokio clock
//! is paused, so provider delays and timeouts cost no wall time.

mod common;

use std::time::Duration;

use common::*;
use provider_gateway_rs::scripted::{Reply, ScriptedProvider};
use provider_gateway_rs::{UpstreamError, UpstreamErrorKind};
use serde_json::{json, Value};
use suggestion_engine_rs::{ClientKind, EngineConfig, SessionStatus, Submission, Tier};

fn short_call_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.stages.provider_call_timeout_ms = 300;
    config
}

#[tokio::test(start_paused = true)]
async fn fast_extension_request_completes_within_budget() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always_after(Duration::from_millis(120), analysis_ok()),
        ScriptedProvider::always_after(Duration::from_millis(200), generation_ok()),
    );

    let started = tokio::time::Instant::now();
    let ticket = h
        .engine
        .submit(
            Submission {
                image: Some(PIXEL_PNG.to_string()),
                tier: Some("fast".into()),
                ..Default::default()
            },
            Some(ClientKind::Extension),
        )
        .unwrap();
    assert_eq!(ticket.tier, Tier::Fast);
    assert_eq!(ticket.phases.len(), 4);

    let session = run_to_end(&h.engine, &ticket.stream_id).await;
    assert!(started.elapsed() <= Duration::from_millis(1_000));
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.progress, 100);
    assert!(!session.degraded);

    let suggestions = session.suggestions.unwrap();
    assert!(suggestions.len() >= 3);
    assert!(suggestions.iter().all(|s| !s.is_fallback));
    assert!(suggestions.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test(start_paused = true)]
async fn needs_more_input_passes_guidance_through() {
    let guidance = "Please upload a screenshot that includes their bio.";
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(Reply::Json(json!({
            "extractedSignals": {},
            "confidence": 0.1,
            "needsMoreInput": true,
            "guidanceMessage": guidance
        }))),
        ScriptedProvider::always(generation_ok()),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    let session = run_to_end(&h.engine, &ticket.stream_id).await;

    assert_eq!(session.status, SessionStatus::NeedsMoreInput);
    assert_eq!(session.guidance_message.as_deref(), Some(guidance));
    assert_eq!(session.suggestions, Some(Vec::new()));
    assert!(session.error.is_none());
    assert_eq!(h.generation.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicates_are_dropped_and_backfilled() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(Reply::Json(json!([
            suggestion("Your hiking photo is amazing, which trail was that?"),
            suggestion("  your hiking photo is AMAZING,   which trail was that?"),
            suggestion("That sunset view looks unreal. Do you chase golden hour often?"),
        ]))),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    let session = run_to_end(&h.engine, &ticket.stream_id).await;

    assert_eq!(session.status, SessionStatus::Completed);
    let suggestions = session.suggestions.unwrap();
    assert_eq!(suggestions.len(), 3);
    assert_eq!(suggestions.iter().filter(|s| !s.is_fallback).count(), 2);
    assert_eq!(suggestions.iter().filter(|s| s.is_fallback).count(), 1);

    let metrics = session.qa_metrics.unwrap();
    assert_eq!(metrics.total_generated, 3);
    assert_eq!(metrics.dropped_for_duplicate, 1);
    assert_eq!(metrics.backfilled, 1);
    assert_eq!(metrics.final_count, 3);
}

#[tokio::test(start_paused = true)]
async fn repeated_generation_timeouts_degrade_to_static_suggestions() {
    let h = harness(
        short_call_config(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always_after(Duration::from_secs(10), generation_ok()),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    assert_eq!(ticket.tier, Tier::Standard);
    let session = run_to_end(&h.engine, &ticket.stream_id).await;

    assert_eq!(h.generation.calls(), 2);
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.degraded);
    let suggestions = session.suggestions.unwrap();
    assert!(suggestions.len() >= 3);
    assert!(suggestions.iter().all(|s| s.is_fallback));
}

#[tokio::test(start_paused = true)]
async fn analysis_timeouts_skip_generation() {
    let h = harness(
        short_call_config(),
        ScriptedProvider::always_after(Duration::from_secs(10), analysis_ok()),
        ScriptedProvider::always(generation_ok()),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    let snapshots = follow(&h.engine, &ticket.stream_id).await;
    let session = snapshots.last().unwrap();

    assert_eq!(h.analysis.calls(), 2);
    assert_eq!(h.generation.calls(), 0);
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.degraded);
    assert!(session.suggestions.as_ref().unwrap().iter().all(|s| s.is_fallback));
}

#[tokio::test(start_paused = true)]
async fn degraded_runs_serve_the_last_good_result() {
    let h = harness(
        short_call_config(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always_after(Duration::from_secs(10), generation_ok()).then(generation_ok()),
    );

    let first = h.engine.submit(submission(), None).unwrap();
    let first = run_to_end(&h.engine, &first.stream_id).await;
    assert!(!first.degraded);
    assert_eq!(h.engine.orchestrator().cache().len(), 1);

    let second = h.engine.submit(submission(), None).unwrap();
    let second = run_to_end(&h.engine, &second.stream_id).await;
    assert!(second.degraded);

    let texts: Vec<String> = second.suggestions.unwrap().into_iter().map(|s| {
        assert!(s.is_fallback);
        s.text
    }).collect();
    assert!(texts.iter().any(|t| GOOD_TEXTS.contains(&t.as_str())), "{:?}", texts);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_generation_discards_results() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always_after(Duration::from_secs(1), generation_ok()),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    let mut rx = h.engine.subscribe(&ticket.stream_id).unwrap();
    rx.wait_for(|s| s.status == SessionStatus::Generating).await.unwrap();

    assert!(h.engine.cancel(&ticket.stream_id).unwrap());
    tokio::time::sleep(Duration::from_secs(5)).await;

    let session = h.engine.get_status(&ticket.stream_id).unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert!(session.suggestions.is_none());
    assert!(!h.engine.cancel(&ticket.stream_id).unwrap());
}

#[tokio::test(start_paused = true)]
async fn generation_auth_failure_reports_configuration_error() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(Reply::Fail(UpstreamError::new(
            UpstreamErrorKind::AuthFailure,
            "generation",
            "401: invalid api_key=sk-live-abcdefghijkl",
        ))),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    let session = run_to_end(&h.engine, &ticket.stream_id).await;

    assert_eq!(h.generation.calls(), 1);
    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(
        session.error.as_deref(),
        Some("Suggestion service is misconfigured: upstream provider rejected our credentials (generation). This is not retryable.")
    );
    assert!(session.suggestions.is_none());
}

#[tokio::test(start_paused = true)]
async fn rate_limit_hint_is_honoured_before_retrying() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(generation_ok())
            .then(Reply::Fail(UpstreamError::rate_limited("generation", Some(Duration::from_millis(400))))),
    );

    let started = tokio::time::Instant::now();
    let ticket = h.engine.submit(submission(), None).unwrap();
    let session = run_to_end(&h.engine, &ticket.stream_id).await;

    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(h.generation.calls(), 2);
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(!session.degraded);
}

#[tokio::test(start_paused = true)]
async fn unavailable_primary_switches_to_alternate() {
    let mut config = EngineConfig::default();
    config.providers.generation = vec!["generation".into(), "backup".into()];

    let backup = std::sync::Arc::new(ScriptedProvider::always(generation_ok()));
    let primary = std::sync::Arc::new(ScriptedProvider::always(Reply::Fail(UpstreamError::unavailable(
        "generation",
        "503 Service Unavailable",
    ))));
    let gateway = provider_gateway_rs::ProviderGateway::default()
        .with_provider("analysis", std::sync::Arc::new(ScriptedProvider::always(analysis_ok())))
        .with_provider("generation", primary.clone())
        .with_provider("backup", backup.clone());
    let engine = suggestion_engine_rs::SuggestionEngine::new(config, gateway);

    let ticket = engine.submit(submission(), None).unwrap();
    let session = run_to_end(&engine, &ticket.stream_id).await;

    assert_eq!(primary.calls(), 1);
    assert_eq!(backup.calls(), 1);
    assert!(!session.degraded);
    assert!(session.suggestions.unwrap().iter().all(|s| !s.is_fallback));
}

#[tokio::test(start_paused = true)]
async fn comprehensive_tier_fans_out_generation() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(Reply::Json(Value::Array(vec![
            suggestion("Your hiking photo is amazing, which trail was that?"),
        ])))
        .then(Reply::Json(Value::Array(vec![
            suggestion("That sunset view looks unreal. Do you chase golden hour often?"),
        ]))),
    );

    let ticket = h
        .engine
        .submit(
            Submission {
                tier: Some("comprehensive".into()),
                ..submission()
            },
            None,
        )
        .unwrap();
    assert_eq!(ticket.tier, Tier::Comprehensive);
    let session = run_to_end(&h.engine, &ticket.stream_id).await;

    assert_eq!(h.generation.calls(), 2);
    let suggestions = session.suggestions.unwrap();
    assert_eq!(suggestions.iter().filter(|s| !s.is_fallback).count(), 2);
}

#[tokio::test(start_paused = true)]
async fn operator_block_list_filters_generated_text() {
    let mut config = EngineConfig::default();
    config.quality.block_patterns = vec![r"\bsunset\b".into()];
    config.quality.block_penalty = 10;
    let h = harness(
        config,
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(generation_ok()),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    let session = run_to_end(&h.engine, &ticket.stream_id).await;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.qa_metrics.unwrap().dropped_for_safety, 1);
    let suggestions = session.suggestions.unwrap();
    assert_eq!(suggestions.len(), 4);
    assert!(suggestions.iter().all(|s| !s.text.to_lowercase().contains("sunset")));
}
