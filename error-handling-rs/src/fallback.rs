//! # Fallback Primitives
//!
//! - `FallbackCache`: TTL cache of last-known-good values, served when the
//!   primary path has to degrade.
//! - `Bulkhead`: semaphore-based concurrency limiter. Callers beyond the limit
//!   wait for a permit instead of being rejected.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::types::{Error, Result};

/// A cache entry with expiration
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    timestamp: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.timestamp.elapsed() > self.ttl
    }
}

/// Configuration for fallback caching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Whether to enable caching
    pub enable_caching: bool,
    /// Default cache TTL
    pub default_ttl: Duration,
    /// Upper bound on entries; the oldest entry is evicted first
    pub max_entries: usize,
    /// Whether to record metrics
    pub record_metrics: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            default_ttl: Duration::from_secs(600),
            max_entries: 1_000,
            record_metrics: true,
        }
    }
}

/// Cache implementation for fallback values
#[derive(Debug)]
pub struct FallbackCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    cache: RwLock<HashMap<K, CacheEntry<V>>>,
    config: FallbackConfig,
    /// Name for metrics
    name: String,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl<K, V> FallbackCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a new fallback cache
    pub fn new<S: Into<String>>(name: S, config: Option<FallbackConfig>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            config: config.unwrap_or_default(),
            name: name.into(),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    /// Gets a live value from the cache; expired entries count as misses
    pub fn get(&self, key: &K) -> Option<V> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);

        match cache.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                self.record(true);
                Some(entry.data.clone())
            }
            Some(_) => {
                debug!(cache = %self.name, "Cache entry expired");
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                self.record(false);
                None
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                self.record(false);
                None
            }
        }
    }

    /// Puts a value in the cache
    pub fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        if !self.config.enable_caching {
            return;
        }

        let entry = CacheEntry::new(value, ttl.unwrap_or(self.config.default_ttl));
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);

        if cache.len() >= self.config.max_entries && !cache.contains_key(&key) {
            cache.retain(|_, entry| !entry.is_expired());
            if cache.len() >= self.config.max_entries {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, entry)| entry.timestamp)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    cache.remove(&oldest);
                }
            }
        }

        cache.insert(key, entry);

        if self.config.record_metrics {
            gauge!("fallback_cache_size", cache.len() as f64, "cache" => self.name.clone());
        }
    }

    /// Removes a value from the cache
    pub fn remove(&self, key: &K) -> bool {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.remove(key).is_some()
    }

    /// Drops expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let before = cache.len();
        cache.retain(|_, entry| !entry.is_expired());
        before - cache.len()
    }

    /// Gets current cache size
    pub fn size(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Hit rate since creation (0.0 when unused)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let total = hits + self.miss_count.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn record(&self, hit: bool) {
        if !self.config.record_metrics {
            return;
        }
        let outcome = if hit { "hit" } else { "miss" };
        counter!("fallback_cache_lookups_total", 1, "cache" => self.name.clone(), "outcome" => outcome);
    }
}

/// Bulkhead limiting concurrent executions of an operation class
#[derive(Debug)]
pub struct Bulkhead {
    /// Name of this bulkhead for metrics
    name: String,
    max_concurrency: usize,
    current: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
    record_metrics: bool,
}

impl Bulkhead {
    /// Creates a new bulkhead
    pub fn new<S: Into<String>>(name: S, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            name: name.into(),
            max_concurrency,
            current: Arc::new(AtomicUsize::new(0)),
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            record_metrics: true,
        }
    }

    /// Sets whether to record metrics
    pub fn with_metrics(mut self, record_metrics: bool) -> Self {
        self.record_metrics = record_metrics;
        self
    }

    /// Gets current concurrency level
    pub fn current_concurrency(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Executes an operation once a permit is available.
    ///
    /// Waiting is unbounded here; callers wrap the whole call in their own
    /// timeout so queueing time counts against their budget.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let queued_at = Instant::now();
        let _permit = self.semaphore.clone().acquire_owned().await.map_err(|_| {
            if self.record_metrics {
                counter!("bulkhead_rejected_total", 1, "bulkhead" => self.name.clone());
            }
            Error::BulkheadClosed {
                name: self.name.clone(),
            }
        })?;

        let current = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        if self.record_metrics {
            histogram!(
                "bulkhead_wait_ms",
                queued_at.elapsed().as_millis() as f64,
                "bulkhead" => self.name.clone()
            );
            gauge!("bulkhead_concurrent", current as f64, "bulkhead" => self.name.clone());
        }

        let result = operation().await;

        let current = self.current.fetch_sub(1, Ordering::Relaxed) - 1;
        if self.record_metrics {
            gauge!("bulkhead_concurrent", current as f64, "bulkhead" => self.name.clone());
        }

        Ok(result)
    }
}
