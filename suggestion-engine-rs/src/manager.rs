// suggestion-engine-rs/src/manager.rs
//
// Session Manager: creates sessions, answers status and cancel calls, and
// hands the orchestrator a `SessionHandle` scoped to one session.

use std::sync::Arc;
use std::time::Duration;

use error_handling_rs::sanitize_message;
use metrics::counter;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::candidate::Suggestion;
use crate::clock::{self, Clock};
use crate::config::SessionConfig;
use crate::quality::QaMetrics;
use crate::session::{Phase, SessionError, SessionStatus, StreamSession};
use crate::store::SessionStore;
use crate::strategy::Tier;

#[derive(Debug, Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    hard_ceiling: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>, config: SessionConfig, hard_ceiling: Duration) -> Self {
        Self {
            store,
            clock,
            config,
            hard_ceiling,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    /// Records a new `pending` session. A live session expires no earlier
    /// than the hard ceiling plus the TTL.
    pub fn create(&self, correlation_id: &str, tier: Tier, estimated_duration: Duration) -> (SessionHandle, StreamSession) {
        let now = self.clock.now();
        let expires_at = clock::add(now, self.hard_ceiling + self.ttl());
        let cancel = CancellationToken::new();

        let session = loop {
            let session = StreamSession::new(
                uuid::Uuid::new_v4().to_string(),
                correlation_id.to_string(),
                tier,
                estimated_duration.as_millis() as u64,
                now,
                expires_at,
            );
            match self.store.insert(session.clone(), cancel.clone()) {
                Ok(()) => break session,
                Err(e) => warn!(error = %e, "Stream id collision, regenerating"),
            }
        };

        counter!("sessions_created_total", 1, "tier" => tier.as_str());
        info!(stream_id = %session.id, correlation_id, tier = %tier, "Session created");

        let handle = SessionHandle {
            id: session.id.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            ttl: self.ttl(),
            cancel,
        };
        (handle, session)
    }

    /// Current snapshot. Expired entries are dropped on read, so a stale
    /// session is never returned.
    pub fn get_status(&self, id: &str) -> Result<StreamSession, SessionError> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.is_expired(self.clock.now()) {
            self.store.remove(id);
            debug!(stream_id = %id, "Dropped expired session on read");
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(session)
    }

    /// Cancels a live session. `Ok(false)` means it had already finished.
    pub fn cancel(&self, id: &str) -> Result<bool, SessionError> {
        self.get_status(id)?;

        let now = self.clock.now();
        let retention = Duration::from_secs(self.config.cancelled_retention_secs);
        let outcome = self.store.update(id, &mut |session| {
            session.finish(SessionStatus::Cancelled, now, clock::add(now, retention));
        });

        match outcome {
            Ok(_) => {
                if let Some(token) = self.store.cancel_token(id) {
                    token.cancel();
                }
                counter!("sessions_finished_total", 1, "status" => SessionStatus::Cancelled.as_str());
                info!(stream_id = %id, "Session cancelled");
                Ok(true)
            }
            Err(SessionError::Terminal { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn subscribe(&self, id: &str) -> Result<watch::Receiver<StreamSession>, SessionError> {
        self.get_status(id)?;
        self.store
            .subscribe(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn active_count(&self) -> usize {
        self.store.active_count()
    }
}

/// Write access to one session, owned by the task running it
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn enter(&self, phase: Phase, progress: u8) -> Result<StreamSession, SessionError> {
        let now = self.clock.now();
        self.store.update(&self.id, &mut |session| session.enter(phase, progress, now))
    }

    pub fn complete(&self, suggestions: Vec<Suggestion>, metrics: QaMetrics, degraded: bool) -> Result<StreamSession, SessionError> {
        let mut payload = Some(suggestions);
        self.finish(SessionStatus::Completed, &mut |session| {
            session.suggestions = payload.take();
            session.qa_metrics = Some(metrics);
            session.degraded = degraded;
        })
    }

    /// Guidance-only outcome; the message is passed through verbatim
    pub fn needs_more_input(&self, guidance: &str) -> Result<StreamSession, SessionError> {
        self.finish(SessionStatus::NeedsMoreInput, &mut |session| {
            session.suggestions = Some(Vec::new());
            session.guidance_message = Some(guidance.to_string());
        })
    }

    pub fn fail(&self, message: &str) -> Result<StreamSession, SessionError> {
        let message = sanitize_message(message);
        self.finish(SessionStatus::Error, &mut |session| {
            session.error = Some(message.clone());
        })
    }

    fn finish(&self, status: SessionStatus, fill: &mut dyn FnMut(&mut StreamSession)) -> Result<StreamSession, SessionError> {
        let now = self.clock.now();
        let expires_at = clock::add(now, self.ttl);
        let snapshot = self.store.update(&self.id, &mut |session| {
            fill(session);
            session.finish(status, now, expires_at);
        })?;
        counter!("sessions_finished_total", 1, "status" => status.as_str());
        Ok(snapshot)
    }
}
