//! Session invariants: monotonic progress, terminal immutability, expiry,
//! validation before any session exists.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use provider_gateway_rs::scripted::ScriptedProvider;
use provider_gateway_rs::ProviderGateway;
use suggestion_engine_rs::{
    ClientKind, EngineConfig, InMemorySessionStore, ManualClock, RequestError, SessionError, SessionStatus,
    SessionStore, Submission, SuggestionEngine, Tier,
};
use tokio_test::assert_err;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn progress_never_decreases() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always_after(Duration::from_millis(300), analysis_ok()),
        ScriptedProvider::always_after(Duration::from_millis(500), generation_ok()),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    let snapshots = follow(&h.engine, &ticket.stream_id).await;

    assert!(snapshots.len() >= 2);
    assert!(snapshots.windows(2).all(|w| w[0].progress <= w[1].progress));
    let last = snapshots.last().unwrap();
    assert_eq!(last.status, SessionStatus::Completed);
    assert_eq!(last.progress, 100);
    assert!(snapshots.iter().any(|s| s.status == SessionStatus::Generating));
}

#[tokio::test(start_paused = true)]
async fn terminal_sessions_are_immutable() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(generation_ok()),
    );

    let ticket = h.engine.submit(submission(), None).unwrap();
    let done = run_to_end(&h.engine, &ticket.stream_id).await;
    assert_eq!(done.status, SessionStatus::Completed);

    assert!(!h.engine.cancel(&ticket.stream_id).unwrap());
    let after = h.engine.get_status(&ticket.stream_id).unwrap();
    assert_eq!(after, done);
}

#[tokio::test(start_paused = true)]
async fn finished_sessions_expire() {
    let clock = Arc::new(ManualClock::default());
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let gateway = ProviderGateway::default()
        .with_provider("analysis", Arc::new(ScriptedProvider::always(analysis_ok())))
        .with_provider("generation", Arc::new(ScriptedProvider::always(generation_ok())));
    let engine = SuggestionEngine::with_parts(EngineConfig::default(), gateway, store.clone(), clock.clone());

    let ticket = engine.submit(submission(), None).unwrap();
    run_to_end(&engine, &ticket.stream_id).await;

    clock.advance(Duration::from_secs(599));
    assert!(engine.get_status(&ticket.stream_id).is_ok());

    let shutdown = CancellationToken::new();
    let sweeper = engine.spawn_sweeper(shutdown.clone());
    clock.advance(Duration::from_secs(2));
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert!(store.is_empty());
    assert_eq!(
        engine.get_status(&ticket.stream_id).unwrap_err(),
        SessionError::NotFound(ticket.stream_id.clone())
    );
    shutdown.cancel();
    sweeper.await.unwrap();
}

#[tokio::test]
async fn unknown_streams_are_not_found() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(generation_ok()),
    );
    assert!(matches!(h.engine.get_status("missing"), Err(SessionError::NotFound(_))));
    assert!(matches!(h.engine.cancel("missing"), Err(SessionError::NotFound(_))));
    assert_err!(h.engine.subscribe("missing"));
}

#[tokio::test]
async fn invalid_submissions_never_create_sessions() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(generation_ok()),
    );

    let missing = assert_err!(h.engine.submit(Submission::default(), None));
    assert_eq!(missing, RequestError::MissingImage);
    assert_eq!(missing.code(), "MISSING_IMAGE_DATA");

    let bad_tier = h
        .engine
        .submit(
            Submission {
                tier: Some("turbo".into()),
                ..submission()
            },
            None,
        )
        .unwrap_err();
    assert_eq!(bad_tier.code(), "INVALID_FIELD");

    let zero_timeout = h
        .engine
        .submit(
            Submission {
                timeout_ms: Some(0),
                ..submission()
            },
            None,
        )
        .unwrap_err();
    assert_eq!(zero_timeout, RequestError::InvalidTimeout);

    assert_eq!(h.engine.sessions().active_count(), 0);
    assert_eq!(h.analysis.calls(), 0);
}

#[tokio::test]
async fn tier_selection_is_deterministic() {
    let h = harness(
        EngineConfig::default(),
        ScriptedProvider::always(analysis_ok()),
        ScriptedProvider::always(generation_ok()),
    );

    for _ in 0..3 {
        let extension = h.engine.submit(submission(), Some(ClientKind::Extension)).unwrap();
        assert_eq!(extension.tier, Tier::Fast);
        let app = h.engine.submit(submission(), None).unwrap();
        assert_eq!(app.tier, Tier::Standard);
    }

    let squeezed = h
        .engine
        .submit(
            Submission {
                tier: Some("comprehensive".into()),
                timeout_ms: Some(4_000),
                ..submission()
            },
            None,
        )
        .unwrap();
    assert_eq!(squeezed.tier, Tier::Standard);
}
