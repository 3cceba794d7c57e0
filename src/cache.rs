use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::CacheSettings;

/// Where a cached payload came from. Provider-sourced entries are the
/// expensive resource being protected, so they get a longer TTL and are
/// evicted last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Provider,
    Internal,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: serde_json::Value,
    timestamp: u64,
    hits: u64,
    last_accessed: u64,
    source: CacheSource,
    cost_estimate: f64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: u64,
    misses: u64,
    provider_calls: u64,
    internal_puts: u64,
    cost_estimate: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub provider_calls: u64,
    pub internal_puts: u64,
    pub cost_estimate: f64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    counters: CacheCounters,
}

/// Process-wide in-memory search cache with TTL- and priority-based
/// eviction. All bookkeeping sits behind one mutex so concurrent handlers
/// never lose hit-count updates.
pub struct SearchCache {
    inner: Mutex<CacheInner>,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Deterministic cache key: the query is lower-cased and params are
/// serialized with sorted keys so argument order never changes the key.
/// The kind segment is preserved as given.
#[must_use]
pub fn cache_key(kind: &str, query: &str, params: &serde_json::Value) -> String {
    let sorted = match params.as_object() {
        Some(map) => {
            let ordered: BTreeMap<&String, &serde_json::Value> = map.iter().collect();
            serde_json::to_string(&ordered).unwrap_or_else(|_| "{}".to_string())
        }
        None => params.to_string(),
    };
    format!("{}:{}:{}", kind, query.to_lowercase(), sorted)
}

impl SearchCache {
    #[must_use]
    pub fn new(settings: CacheSettings, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                counters: CacheCounters::default(),
            }),
            settings,
            clock,
            sweeper: Mutex::new(None),
        })
    }

    const fn ttl_ms(&self, source: CacheSource) -> u64 {
        match source {
            CacheSource::Provider => self.settings.ttl_provider_minutes * 60_000,
            CacheSource::Internal => self.settings.ttl_default_minutes * 60_000,
        }
    }

    /// Returns the payload on a fresh hit, `None` on absence or expiry.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let expired = match inner.entries.get(key) {
            Some(entry) => now.saturating_sub(entry.timestamp) > self.ttl_ms(entry.source),
            None => {
                inner.counters.misses += 1;
                metrics::counter!("guardarr_cache_misses_total").increment(1);
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.counters.misses += 1;
            metrics::counter!("guardarr_cache_misses_total").increment(1);
            return None;
        }

        let entry = inner.entries.get_mut(key)?;
        entry.hits += 1;
        entry.last_accessed = now;
        let data = entry.data.clone();
        inner.counters.hits += 1;
        metrics::counter!("guardarr_cache_hits_total").increment(1);
        Some(data)
    }

    pub fn put(&self, key: &str, data: serde_json::Value, source: CacheSource, cost: f64) {
        let now = self.clock.now_ms();
        let ttls = self.ttls();
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if inner.entries.len() >= self.settings.max_size {
            Self::evict_locked(&mut inner, now, &self.settings, ttls);
        }

        match source {
            CacheSource::Provider => {
                inner.counters.provider_calls += 1;
                inner.counters.cost_estimate += cost;
            }
            CacheSource::Internal => inner.counters.internal_puts += 1,
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                timestamp: now,
                hits: 0,
                last_accessed: now,
                source,
                cost_estimate: cost,
            },
        );
    }

    const fn ttls(&self) -> (u64, u64) {
        (
            self.ttl_ms(CacheSource::Provider),
            self.ttl_ms(CacheSource::Internal),
        )
    }

    /// Removes expired entries; when occupancy is above 90% of `max_size`,
    /// additionally removes the lowest-priority entries (non-provider first,
    /// then fewest hits, then least recently accessed) until occupancy is
    /// back at 80%.
    pub fn evict(&self) {
        let now = self.clock.now_ms();
        let ttls = self.ttls();
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Self::evict_locked(&mut inner, now, &self.settings, ttls);
    }

    fn evict_locked(
        inner: &mut CacheInner,
        now: u64,
        settings: &CacheSettings,
        (ttl_provider, ttl_internal): (u64, u64),
    ) {
        let before = inner.entries.len();

        inner.entries.retain(|_, e| {
            let ttl = match e.source {
                CacheSource::Provider => ttl_provider,
                CacheSource::Internal => ttl_internal,
            };
            now.saturating_sub(e.timestamp) <= ttl
        });

        let soft_limit = settings.max_size * 9 / 10;
        if inner.entries.len() <= soft_limit {
            if before != inner.entries.len() {
                debug!("Cache sweep removed {} expired entries", before - inner.entries.len());
            }
            return;
        }

        let target = settings.max_size * 8 / 10;
        let mut ranked: Vec<(String, bool, u64, u64)> = inner
            .entries
            .iter()
            .map(|(k, e)| {
                (
                    k.clone(),
                    e.source == CacheSource::Provider,
                    e.hits,
                    e.last_accessed,
                )
            })
            .collect();

        // Provider entries sort last so they are kept longest.
        ranked.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.3.cmp(&b.3))
        });

        let excess = inner.entries.len().saturating_sub(target);
        for (key, _, _, _) in ranked.into_iter().take(excess) {
            inner.entries.remove(&key);
        }

        debug!(
            "Cache eviction: {} -> {} entries (target {})",
            before,
            inner.entries.len(),
            target
        );
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        CacheStats {
            entries: inner.entries.len(),
            max_size: self.settings.max_size,
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            provider_calls: inner.counters.provider_calls,
            internal_puts: inner.counters.internal_puts,
            cost_estimate: inner.counters.cost_estimate,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears entries and counters. Test teardown hook.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.entries.clear();
        inner.counters = CacheCounters::default();
    }

    /// Starts the periodic TTL sweep. Idempotent: a second call while the
    /// sweeper is running is a no-op.
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut guard = self
            .sweeper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let cache = Arc::clone(self);
        let every = std::time::Duration::from_secs(self.settings.sweep_interval_minutes * 60);
        info!(
            "Cache maintenance sweep every {} minutes",
            self.settings.sweep_interval_minutes
        );
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                cache.evict();
            }
        }));
    }

    /// Stops the sweep task. Safe to call when not running.
    pub fn stop_maintenance(&self) {
        let mut guard = self
            .sweeper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}

impl Drop for SearchCache {
    fn drop(&mut self) {
        self.stop_maintenance();
    }
}
