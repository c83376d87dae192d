//! Per-scope hit/miss statistics.
//!
//! Advisory only: counters feed logs and metrics and never influence what
//! the cache returns.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::counter;

use super::keys::Scope;

const METRIC_HIT: &str = "catalogcache_hit_total";
const METRIC_MISS: &str = "catalogcache_miss_total";

#[derive(Debug, Default)]
struct ScopeCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time counters for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeStats {
    pub hits: u64,
    pub misses: u64,
}

impl ScopeStats {
    /// Hit percentage, or `None` before the first lookup.
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 * 100.0 / total as f64)
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    scopes: DashMap<Scope, ScopeCounters>,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, scope: &Scope) {
        self.counters(scope, |counters| {
            counters.hits.fetch_add(1, Ordering::Relaxed);
        });
        counter!(METRIC_HIT, "scope" => scope.to_string()).increment(1);
    }

    pub fn record_miss(&self, scope: &Scope) {
        self.counters(scope, |counters| {
            counters.misses.fetch_add(1, Ordering::Relaxed);
        });
        counter!(METRIC_MISS, "scope" => scope.to_string()).increment(1);
    }

    pub fn snapshot(&self, scope: &Scope) -> ScopeStats {
        self.scopes
            .get(scope)
            .map(|counters| ScopeStats {
                hits: counters.hits.load(Ordering::Relaxed),
                misses: counters.misses.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    /// Forget all counters, for every scope.
    pub fn reset(&self) {
        self.scopes.clear();
    }

    fn counters(&self, scope: &Scope, apply: impl FnOnce(&ScopeCounters)) {
        if let Some(counters) = self.scopes.get(scope) {
            apply(&counters);
            return;
        }
        apply(&self.scopes.entry(scope.clone()).or_default());
    }
}
