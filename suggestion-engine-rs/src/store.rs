// suggestion-engine-rs/src/store.rs
//
// Process-scoped session store. Each entry is a watch channel: writers use
// `send_if_modified` so every reader sees a whole snapshot, and subscribers
// get each new snapshot pushed to them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::session::{SessionError, StreamSession};

/// Storage for live and recently finished sessions
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    fn insert(&self, session: StreamSession, cancel: CancellationToken) -> Result<(), SessionError>;

    fn get(&self, id: &str) -> Option<StreamSession>;

    fn subscribe(&self, id: &str) -> Option<watch::Receiver<StreamSession>>;

    fn cancel_token(&self, id: &str) -> Option<CancellationToken>;

    /// Applies `apply` to a live session and returns the new snapshot.
    /// Terminal sessions are left untouched and yield `SessionError::Terminal`.
    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut StreamSession)) -> Result<StreamSession, SessionError>;

    fn remove(&self, id: &str) -> Option<StreamSession>;

    /// Drops every session whose `expires_at` is at or before `now`
    fn evict_expired(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions not yet in a terminal status
    fn active_count(&self) -> usize;
}

#[derive(Debug)]
struct SessionSlot {
    sender: watch::Sender<StreamSession>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    slots: DashMap<String, SessionSlot>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: StreamSession, cancel: CancellationToken) -> Result<(), SessionError> {
        let id = session.id.clone();
        match self.slots.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SessionError::Duplicate(id)),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (sender, _) = watch::channel(session);
                entry.insert(SessionSlot { sender, cancel });
                Ok(())
            }
        }
    }

    fn get(&self, id: &str) -> Option<StreamSession> {
        self.slots.get(id).map(|slot| slot.sender.borrow().clone())
    }

    fn subscribe(&self, id: &str) -> Option<watch::Receiver<StreamSession>> {
        self.slots.get(id).map(|slot| slot.sender.subscribe())
    }

    fn cancel_token(&self, id: &str) -> Option<CancellationToken> {
        self.slots.get(id).map(|slot| slot.cancel.clone())
    }

    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut StreamSession)) -> Result<StreamSession, SessionError> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        let mut refused = None;
        slot.sender.send_if_modified(|session| {
            if session.is_terminal() {
                refused = Some(session.status);
                return false;
            }
            apply(session);
            true
        });

        if let Some(status) = refused {
            return Err(SessionError::Terminal {
                id: id.to_string(),
                status,
            });
        }
        let snapshot = slot.sender.borrow().clone();
        Ok(snapshot)
    }

    fn remove(&self, id: &str) -> Option<StreamSession> {
        self.slots.remove(id).map(|(_, slot)| {
            // Dropping the sender closes subscriber streams
            slot.cancel.cancel();
            let snapshot = slot.sender.borrow().clone();
            snapshot
        })
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.value().sender.borrow().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired.iter().filter(|id| self.remove(id).is_some()).count()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| !entry.value().sender.borrow().is_terminal())
            .count()
    }
}

/// Periodically evicts expired sessions until `shutdown` fires
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs(), "Session sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = store.evict_expired(clock.now());
                    if evicted > 0 {
                        counter!("sessions_evicted_total", evicted as u64);
                        debug!(evicted, remaining = store.len(), "Evicted expired sessions");
                    }
                    gauge!("sessions_active", store.active_count() as f64);
                }
            }
        }
        info!("Session sweeper stopped");
    })
}
