//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use provider_gateway_rs::scripted::{Reply, ScriptedProvider};
use provider_gateway_rs::ProviderGateway;
use serde_json::{json, Value};
use suggestion_engine_rs::{EngineConfig, StreamSession, Submission, SuggestionEngine};

/// Smallest valid PNG, as a data URL
pub const PIXEL_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

pub const GOOD_TEXTS: [&str; 5] = [
    "Your hiking photo is amazing, which trail was that?",
    "That sunset view looks unreal. Do you chase golden hour often?",
    "Okay, your dog clearly runs the show. What's their name?",
    "I see a fellow coffee snob. Where's your favourite spot in town?",
    "Your bio says you love live music. Best concert you've been to?",
];

pub fn analysis_ok() -> Reply {
    Reply::Json(json!({
        "extractedSignals": {
            "extractedText": "Loves hiking, coffee and live music",
            "visualHints": ["mountain trail", "sunset"],
            "personalitySignals": ["adventurous"]
        },
        "confidence": 0.92
    }))
}

pub fn suggestion(text: &str) -> Value {
    json!({
        "text": text,
        "tone": "playful",
        "topics": ["outdoors"],
        "componentScores": {
            "contextualRelevance": 0.8,
            "creativity": 0.8,
            "appropriateness": 0.8,
            "personalization": 0.8,
            "engagement": 0.8
        }
    })
}

pub fn generation_ok() -> Reply {
    Reply::Json(Value::Array(GOOD_TEXTS.iter().map(|t| suggestion(t)).collect()))
}

pub struct Harness {
    pub engine: SuggestionEngine,
    pub analysis: Arc<ScriptedProvider>,
    pub generation: Arc<ScriptedProvider>,
}

pub fn harness(config: EngineConfig, analysis: ScriptedProvider, generation: ScriptedProvider) -> Harness {
    let analysis = Arc::new(analysis);
    let generation = Arc::new(generation);
    let gateway = ProviderGateway::default()
        .with_provider("analysis", analysis.clone())
        .with_provider("generation", generation.clone());
    Harness {
        engine: SuggestionEngine::new(config, gateway),
        analysis,
        generation,
    }
}

pub fn submission() -> Submission {
    Submission {
        image: Some(PIXEL_PNG.to_string()),
        context: Some("Matched yesterday, she likes hiking".to_string()),
        ..Default::default()
    }
}

/// Follows the push view until the session reaches a terminal status and
/// returns every snapshot seen on the way.
pub async fn follow(engine: &SuggestionEngine, stream_id: &str) -> Vec<StreamSession> {
    let mut rx = engine.subscribe(stream_id).expect("session should exist");
    let mut seen = Vec::new();
    let follow = async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            let done = snapshot.is_terminal();
            seen.push(snapshot);
            if done {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), follow)
        .await
        .expect("session did not finish");
    seen
}

pub async fn run_to_end(engine: &SuggestionEngine, stream_id: &str) -> StreamSession {
    follow(engine, stream_id)
        .await
        .pop()
        .expect("at least one snapshot")
}
