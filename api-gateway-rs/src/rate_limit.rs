// Rate Limiting Module using a simple in-memory fixed window per client.
//
// Only the analyze route is limited; polling, cancel and push are cheap and
// must keep working for a client that has used up its submissions.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// Analyze requests allowed per window
pub const DEFAULT_MAX_REQUESTS: u32 = 30;
/// Window length (15 minutes)
pub const DEFAULT_WINDOW_SECS: u64 = 15 * 60;
/// How often elapsed windows are dropped
pub const DEFAULT_PURGE_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
struct RateLimitInfo {
    count: u32,
    window_start: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: DashMap<String, RateLimitInfo>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: DashMap::new(),
        }
    }

    /// Reads `RATE_LIMIT_MAX_REQUESTS` and `RATE_LIMIT_WINDOW_SECS`
    pub fn from_env() -> Self {
        Self::new(
            config_rs::env_or("RATE_LIMIT_MAX_REQUESTS", DEFAULT_MAX_REQUESTS),
            Duration::from_secs(config_rs::env_or("RATE_LIMIT_WINDOW_SECS", DEFAULT_WINDOW_SECS)),
        )
    }

    /// Counts one request for `client`, failing once the window is full
    pub fn check(&self, client: &str) -> Result<(), ApiError> {
        let now = Instant::now();
        let mut entry = self.clients.entry(client.to_string()).or_insert(RateLimitInfo {
            count: 0,
            window_start: now,
        });

        // Reset window if expired
        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.max_requests {
            let retry_after = self.window.saturating_sub(now.duration_since(entry.window_start));
            metrics::counter!("rate_limited_total", 1);
            tracing::warn!(client, limit = self.max_requests, "Rate limit exceeded");
            return Err(ApiError::RateLimited {
                limit: self.max_requests,
                window_secs: self.window.as_secs(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        entry.count += 1;
        Ok(())
    }

    /// Drops windows that have fully elapsed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.clients.len();
        self.clients
            .retain(|_, info| now.duration_since(info.window_start) < self.window);
        before - self.clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Purges elapsed windows every `every` until `shutdown` fires, so
    /// one-off clients do not accumulate.
    pub fn spawn_purger(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = every.as_secs(), "Rate limit purger started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = self.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, remaining = self.tracked_clients(), "Purged rate limit windows");
                        }
                        metrics::gauge!("rate_limit_tracked_clients", self.tracked_clients() as f64);
                    }
                }
            }
            tracing::info!("Rate limit purger stopped");
        })
    }
}

/// Client identity for rate limiting: explicit client id, else the first
/// forwarded address, else a shared anonymous bucket
pub fn client_key(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header("x-client-id")
        .or_else(|| header("x-forwarded-for").and_then(|v| v.split(',').next().map(|s| s.trim().to_string())))
        .unwrap_or_else(|| "anonymous".to_string())
}
