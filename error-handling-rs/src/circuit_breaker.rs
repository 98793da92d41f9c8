//! # Circuit Breaker
//!
//! Per-target circuit breaker used to track upstream provider health.
//!
//! Features include:
//! - Standard circuit states (Closed, Open, Half-Open)
//! - Error percentage threshold over a sliding window
//! - Exponential reopen backoff after failed half-open trials
//! - Health snapshots for health endpoints

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked
    Open,
    /// Testing recovery, limited requests allowed
    HalfOpen,
}

impl CircuitState {
    fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF-OPEN"),
        }
    }
}

/// Result tracking for a sliding window
#[derive(Debug)]
struct ResultWindow {
    size: usize,
    /// true = success, false = failure
    results: VecDeque<bool>,
    failure_count: usize,
}

impl ResultWindow {
    fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            results: VecDeque::with_capacity(size.max(1)),
            failure_count: 0,
        }
    }

    fn add_result(&mut self, success: bool) {
        if self.results.len() >= self.size {
            if let Some(false) = self.results.pop_front() {
                self.failure_count = self.failure_count.saturating_sub(1);
            }
        }

        self.results.push_back(success);
        if !success {
            self.failure_count += 1;
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.failure_count as f64 / self.results.len() as f64
        }
    }

    fn total(&self) -> usize {
        self.results.len()
    }

    fn clear(&mut self) {
        self.results.clear();
        self.failure_count = 0;
    }
}

#[derive(Debug)]
struct CircuitStats {
    state: CircuitState,
    last_state_change: Instant,
    window: ResultWindow,
    /// Consecutive successes in half-open state
    consecutive_successes: usize,
    /// Trial calls still allowed in half-open state
    half_open_remaining: usize,
    /// When the last half-open trial was let through
    last_trial_at: Instant,
    /// Multiplier applied to the reset timeout after failed trials
    backoff_multiplier: u32,
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Size of the sliding window for error tracking
    pub window_size: usize,
    /// Error threshold percentage to trip the circuit (0.0 to 1.0)
    pub error_threshold: f64,
    /// Minimum number of requests before error threshold applies
    pub minimum_request_threshold: usize,
    /// Time to keep circuit open before testing
    pub reset_timeout: Duration,
    /// Number of consecutive successes to close circuit from half-open
    pub half_open_success_threshold: usize,
    /// Maximum number of allowed requests in half-open state
    pub half_open_max_calls: usize,
    /// Upper bound for the backed-off reset timeout
    pub max_backoff_time: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            error_threshold: 0.5,
            minimum_request_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
            half_open_max_calls: 3,
            max_backoff_time: Duration::from_secs(120),
        }
    }
}

/// Health metrics for a circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitHealth {
    pub state: CircuitState,
    /// Current error rate (0.0 to 1.0)
    pub error_rate: f64,
    /// Total requests in tracking window
    pub request_count: usize,
    pub time_in_state_ms: u64,
}

/// Circuit breaker keyed by target name (one circuit per upstream).
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, CircuitStats>>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given name and configuration
    pub fn new<S: Into<String>>(name: S, config: Option<CircuitBreakerConfig>) -> Self {
        Self {
            name: name.into(),
            config: config.unwrap_or_default(),
            circuits: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitStats>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_stats(&self) -> CircuitStats {
        CircuitStats {
            state: CircuitState::Closed,
            last_state_change: Instant::now(),
            window: ResultWindow::new(self.config.window_size),
            consecutive_successes: 0,
            half_open_remaining: self.config.half_open_max_calls,
            last_trial_at: Instant::now(),
            backoff_multiplier: 1,
        }
    }

    fn open_timeout(&self, stats: &CircuitStats) -> Duration {
        std::cmp::min(
            self.config.reset_timeout * stats.backoff_multiplier,
            self.config.max_backoff_time,
        )
    }

    fn transition(&self, target: &str, stats: &mut CircuitStats, to: CircuitState) {
        let from = stats.state;
        stats.state = to;
        stats.last_state_change = Instant::now();
        stats.consecutive_successes = 0;
        if to == CircuitState::HalfOpen {
            stats.half_open_remaining = self.config.half_open_max_calls;
        }
        if to == CircuitState::Closed {
            stats.backoff_multiplier = 1;
            stats.window.clear();
        }

        counter!(
            "circuit_breaker_transitions_total",
            1,
            "breaker" => self.name.clone(),
            "target" => target.to_string(),
            "to" => to.to_string()
        );
        gauge!(
            "circuit_breaker_state",
            to.as_gauge(),
            "breaker" => self.name.clone(),
            "target" => target.to_string()
        );

        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                circuit = %target,
                from = %from,
                error_rate = %format!("{:.2}%", stats.window.failure_rate() * 100.0),
                "Circuit OPEN"
            ),
            _ => info!(breaker = %self.name, circuit = %target, from = %from, to = %to, "Circuit state changed"),
        }
    }

    /// Checks if a request to the target is allowed, moving an expired open
    /// circuit to half-open.
    pub fn is_allowed(&self, target: &str) -> bool {
        let mut circuits = self.lock();
        let stats = circuits
            .entry(target.to_string())
            .or_insert_with(|| self.new_stats());

        match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let timeout = self.open_timeout(stats);
                if stats.last_state_change.elapsed() >= timeout {
                    self.transition(target, stats, CircuitState::HalfOpen);
                    stats.half_open_remaining = stats.half_open_remaining.saturating_sub(1);
                    stats.last_trial_at = Instant::now();
                    true
                } else {
                    debug!(breaker = %self.name, circuit = %target, "Circuit open, request rejected");
                    false
                }
            }
            CircuitState::HalfOpen => {
                // Trials whose outcome never came back are written off once
                // a full open timeout has passed without one
                if stats.half_open_remaining == 0 && stats.last_trial_at.elapsed() >= self.open_timeout(stats) {
                    debug!(breaker = %self.name, circuit = %target, "Half-open trials unanswered, re-arming");
                    stats.half_open_remaining = self.config.half_open_max_calls;
                }
                if stats.half_open_remaining > 0 {
                    stats.half_open_remaining -= 1;
                    stats.last_trial_at = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    fn release_trial(&self, stats: &mut CircuitStats) {
        if stats.state == CircuitState::HalfOpen {
            stats.half_open_remaining = (stats.half_open_remaining + 1).min(self.config.half_open_max_calls);
        }
    }

    /// Records an allowed call whose outcome says nothing about the target's
    /// health (rejected credentials, unusable body, abandoned call). Only
    /// hands a half-open trial slot back.
    pub fn record_neutral(&self, target: &str) {
        let mut circuits = self.lock();
        if let Some(stats) = circuits.get_mut(target) {
            self.release_trial(stats);
        }
    }

    /// Records a successful call to the target
    pub fn record_success(&self, target: &str) {
        let mut circuits = self.lock();
        let stats = circuits
            .entry(target.to_string())
            .or_insert_with(|| self.new_stats());

        stats.window.add_result(true);

        if stats.state == CircuitState::HalfOpen {
            stats.consecutive_successes += 1;
            if stats.consecutive_successes >= self.config.half_open_success_threshold {
                self.transition(target, stats, CircuitState::Closed);
            } else {
                self.release_trial(stats);
            }
        }
    }

    /// Records a failed call to the target
    pub fn record_failure(&self, target: &str) {
        let mut circuits = self.lock();
        let stats = circuits
            .entry(target.to_string())
            .or_insert_with(|| self.new_stats());

        stats.window.add_result(false);

        match stats.state {
            CircuitState::Closed => {
                if stats.window.total() >= self.config.minimum_request_threshold
                    && stats.window.failure_rate() >= self.config.error_threshold
                {
                    self.transition(target, stats, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Any failed trial reopens the circuit with a longer timeout
                stats.backoff_multiplier = std::cmp::min(stats.backoff_multiplier * 2, 16);
                self.transition(target, stats, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state of a target's circuit (closed if never seen)
    pub fn get_state(&self, target: &str) -> CircuitState {
        self.lock()
            .get(target)
            .map(|stats| stats.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Health snapshot for a target
    pub fn get_health(&self, target: &str) -> CircuitHealth {
        let circuits = self.lock();
        match circuits.get(target) {
            Some(stats) => CircuitHealth {
                state: stats.state,
                error_rate: stats.window.failure_rate(),
                request_count: stats.window.total(),
                time_in_state_ms: stats.last_state_change.elapsed().as_millis() as u64,
            },
            None => CircuitHealth {
                state: CircuitState::Closed,
                error_rate: 0.0,
                request_count: 0,
                time_in_state_ms: 0,
            },
        }
    }

    /// Resets a target's circuit to closed
    pub fn reset(&self, target: &str) {
        let mut circuits = self.lock();
        if let Some(stats) = circuits.get_mut(target) {
            self.transition(target, stats, CircuitState::Closed);
        }
    }
}
