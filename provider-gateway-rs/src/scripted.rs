// provider-gateway-rs/src/scripted.rs
//
// Deterministic provider for test suites: replays a queue of canned replies,
// each after an optional delay (use a paused tokio clock to make delays free).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::UpstreamError;
use crate::provider::Provider;

#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond with this JSON value
    Json(Value),
    /// Respond with a raw body, useful for malformed responses
    Body(String),
    Fail(UpstreamError),
}

#[derive(Debug)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<(Duration, Reply)>>,
    fallback: (Duration, Reply),
    calls: AtomicUsize,
    payloads: Mutex<Vec<Value>>,
}

impl ScriptedProvider {
    /// A provider that answers every call with `reply` immediately
    pub fn always(reply: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: (Duration::ZERO, reply),
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Every call answers with `reply` after `delay`
    pub fn always_after(delay: Duration, reply: Reply) -> Self {
        let mut provider = Self::always(reply);
        provider.fallback.0 = delay;
        provider
    }

    /// Queues a reply for the next unanswered call
    pub fn then(self, reply: Reply) -> Self {
        self.then_after(Duration::ZERO, reply)
    }

    pub fn then_after(self, delay: Duration, reply: Reply) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((delay, reply));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn send(&self, payload: &Value) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.clone());

        let (delay, reply) = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Json(value) => Ok(value.to_string()),
            Reply::Body(body) => Ok(body),
            Reply::Fail(error) => Err(error),
        }
    }
}
