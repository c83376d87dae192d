//! Result cache in front of the field indexes.
//!
//! Every operation goes through the availability breaker first and degrades
//! to a miss or a no-op on any backend trouble. Writes carry the result set
//! together with merged back-references for the invalidation index, and
//! identical batches are debounced so query storms do not hammer the backend
//! with the same write.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::{debug, error, instrument, warn};

use crate::util::lock::mutex_lock;

use super::backend::CacheBackend;
use super::breaker::AvailabilityBreaker;
use super::clock::Clock;
use super::config::CacheConfig;
use super::entry::{QueryResult, ResultSet};
use super::error::CacheError;
use super::invalidation::{InvalidationIndex, InvalidationTarget};
use super::keys::{BackendKey, CacheKey, RecordId, Scope};
use super::stats::CacheStats;

const SOURCE: &str = "cache::store";
const METRIC_WRITE_DEBOUNCED: &str = "catalogcache_write_debounced_total";
const RECENT_WRITES_PRUNE_THRESHOLD: usize = 4096;
const MISS_STREAKS_PRUNE_THRESHOLD: usize = 4096;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(ResultSet),
    Miss,
}

pub struct ResultCache {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    breaker: Arc<AvailabilityBreaker>,
    invalidation: InvalidationIndex,
    clock: Arc<dyn Clock>,
    /// Consecutive misses per fully qualified entry key.
    miss_streaks: Mutex<HashMap<String, u32>>,
    /// Batch fingerprint to the time it was last written.
    recent_writes: DashMap<String, i64>,
    stats: CacheStats,
}

impl ResultCache {
    /// Create a cache service with a closed breaker and empty in-process state.
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        let breaker = Arc::new(AvailabilityBreaker::new(
            config.enabled,
            config.retry_interval(),
            clock.clone(),
        ));
        let invalidation = InvalidationIndex::new(backend.clone(), breaker.clone(), config.ttl());
        Self {
            config,
            backend,
            breaker,
            invalidation,
            clock,
            miss_streaks: Mutex::new(HashMap::new()),
            recent_writes: DashMap::new(),
            stats: CacheStats::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<AvailabilityBreaker> {
        &self.breaker
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Look up a cached result set.
    #[instrument(skip(self, scope, key), fields(scope = %scope, cache_key = %key))]
    pub async fn get(&self, scope: &Scope, key: &CacheKey) -> CacheLookup {
        if !self.breaker.available() {
            debug!("Cache lookup skipped: backend unavailable");
            return CacheLookup::Miss;
        }

        let entry_key = scope.full_key(&BackendKey::Entry(key.clone()));
        let raw = match self.backend.get(&entry_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.note_miss(&entry_key);
                return CacheLookup::Miss;
            }
            Err(err) => {
                let err = CacheError::backend("get", err);
                error!(
                    backend = self.backend.provider_name(),
                    error = %err,
                    "Cache lookup failed"
                );
                self.breaker.report_failure();
                return CacheLookup::Miss;
            }
        };

        match ResultSet::decode(&entry_key, &raw) {
            Ok(rows) => {
                mutex_lock(&self.miss_streaks, SOURCE, "get.reset").remove(&entry_key);
                CacheLookup::Hit(rows)
            }
            Err(err) => {
                warn!(error = %err, "Treating malformed cached value as absent");
                self.note_miss(&entry_key);
                CacheLookup::Miss
            }
        }
    }

    /// Store a result set with back-references for `record ids ∪ fields`.
    ///
    /// Skipped when the backend is unavailable or the result is the
    /// unfiltered catalog.
    #[instrument(skip(self, scope, key, result, field_names), fields(scope = %scope, cache_key = %key))]
    pub async fn put(
        &self,
        scope: &Scope,
        key: &CacheKey,
        result: &QueryResult,
        field_names: &[String],
    ) {
        if let Err(err) = self.try_put(scope, key, result, field_names).await {
            match err {
                CacheError::BackendUnavailable => debug!("Cache write skipped: backend unavailable"),
                err => error!(error = %err, "Cache write failed"),
            }
        }
    }

    async fn try_put(
        &self,
        scope: &Scope,
        key: &CacheKey,
        result: &QueryResult,
        field_names: &[String],
    ) -> Result<(), CacheError> {
        if !self.breaker.available() {
            return Err(CacheError::BackendUnavailable);
        }

        let Some(rows) = result.matched() else {
            debug!("Unfiltered result is never cached");
            return Ok(());
        };

        let entry_local = BackendKey::Entry(key.clone());
        let entry_key = scope.full_key(&entry_local);
        let targets = InvalidationIndex::targets(
            rows.ids(),
            field_names
                .iter()
                .map(String::as_str)
                .filter(|field| self.config.tracks_field(field)),
        );

        let mut batch = self
            .invalidation
            .merged_back_references(scope, &entry_key, &targets)
            .await?;
        let encoded = rows
            .encode()
            .map_err(|err| CacheError::malformed(entry_key.clone(), err.to_string()))?;
        batch.insert(entry_local.to_string(), encoded);

        let now = self.clock.now();
        let fingerprint = fingerprint(&batch);
        if let Some(written_at) = self.recent_writes.get(&fingerprint).map(|at| *at)
            && now.saturating_sub(written_at) < self.config.write_debounce()
        {
            debug!(%fingerprint, "Identical cache write done recently; skipping");
            counter!(METRIC_WRITE_DEBOUNCED).increment(1);
            return Ok(());
        }
        self.remember_write(fingerprint, now);

        self.invalidation.write_batch(scope, &batch).await
    }

    /// Evict every cached result that contained `record_id`.
    pub async fn invalidate_by_record(&self, scope: &Scope, record_id: RecordId) {
        self.invalidate(scope, InvalidationTarget::Record(record_id))
            .await;
    }

    /// Evict every cached result whose query touched `field`.
    pub async fn invalidate_by_field(&self, scope: &Scope, field: &str) {
        self.invalidate(scope, InvalidationTarget::Field(field.to_string()))
            .await;
    }

    async fn invalidate(&self, scope: &Scope, target: InvalidationTarget) {
        match self.invalidation.invalidate(scope, &target).await {
            Ok(0) => {}
            Ok(removed) => debug!(scope = %scope, ?target, removed, "Cache entries invalidated"),
            Err(CacheError::BackendUnavailable) => {
                debug!(scope = %scope, ?target, "Invalidation skipped: backend unavailable")
            }
            Err(err) => error!(scope = %scope, ?target, error = %err, "Cache invalidation failed"),
        }
    }

    /// Flush the whole backend and reset in-process state.
    ///
    /// The backend has no prefix delete, so this drops every scope's keys.
    pub async fn flush(&self, scope: &Scope) {
        if self.breaker.available() {
            debug!(scope = %scope, "Flushing cache backend");
            if let Err(err) = self.backend.flush_all().await {
                let err = CacheError::backend("flush_all", err);
                error!(
                    scope = %scope,
                    backend = self.backend.provider_name(),
                    error = %err,
                    "Cache flush failed"
                );
                self.breaker.report_failure();
            }
        }
        self.stats.reset();
        self.recent_writes.clear();
        mutex_lock(&self.miss_streaks, SOURCE, "flush").clear();
    }

    /// Count a miss; too many in a row for one key means the backend is
    /// dropping writes, so stop using it for a while.
    fn note_miss(&self, entry_key: &str) {
        let mut streaks = mutex_lock(&self.miss_streaks, SOURCE, "note_miss");
        if streaks.len() >= MISS_STREAKS_PRUNE_THRESHOLD && !streaks.contains_key(entry_key) {
            // Single misses are the common cold-key case; drop them first.
            streaks.retain(|_, streak| *streak > 1);
            if streaks.len() >= MISS_STREAKS_PRUNE_THRESHOLD {
                streaks.clear();
            }
        }
        let streak = streaks.entry(entry_key.to_string()).or_insert(0);
        *streak += 1;
        if *streak > self.config.miss_streak_limit {
            error!(
                cache_key = entry_key,
                misses = *streak,
                "Cache keeps missing the same key; marking backend unavailable"
            );
            streaks.clear();
            drop(streaks);
            self.breaker.report_failure();
        }
    }

    #[cfg(test)]
    fn tracked_miss_streaks(&self) -> usize {
        mutex_lock(&self.miss_streaks, SOURCE, "tracked_miss_streaks").len()
    }

    fn remember_write(&self, fingerprint: String, now: i64) {
        if self.recent_writes.len() >= RECENT_WRITES_PRUNE_THRESHOLD {
            let window = self.config.write_debounce();
            self.recent_writes
                .retain(|_, written_at| now.saturating_sub(*written_at) < window);
        }
        self.recent_writes.insert(fingerprint, now);
    }
}

/// Deterministic digest of a write batch.
fn fingerprint(batch: &BTreeMap<String, Bytes>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in batch {
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    hex::encode(hasher.finalize())
}
