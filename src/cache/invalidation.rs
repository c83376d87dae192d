//! Reverse invalidation index kept inside the cache backend.
//!
//! For every record id and field name that contributed to a cached result,
//! the backend holds a back-reference list of the fully qualified entry keys
//! that depend on it. Invalidating a record or field deletes those entries
//! together with the list itself, so nothing outside the affected results
//! is ever evicted.
//!
//! Lists are maintained with an optimistic read-merge-write. Concurrent
//! writers may overwrite each other's merge; that can only lose a reference
//! written in the same instant, and lists are always merged (never replaced)
//! from what the backend currently holds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, error, instrument, warn};

use super::backend::{BackendError, CacheBackend};
use super::breaker::AvailabilityBreaker;
use super::entry::{decode_back_references, encode_back_references};
use super::error::CacheError;
use super::keys::{BackendKey, CacheKey, RecordId, Scope};

const METRIC_INVALIDATED_KEYS: &str = "catalogcache_invalidated_keys_total";

/// What an invalidation is keyed by. Record and field are mutually exclusive
/// per call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationTarget {
    Record(RecordId),
    Field(String),
}

impl InvalidationTarget {
    pub fn backend_key(&self) -> BackendKey {
        match self {
            InvalidationTarget::Record(id) => BackendKey::Record(*id),
            InvalidationTarget::Field(name) => BackendKey::Field(name.clone()),
        }
    }
}

pub struct InvalidationIndex {
    backend: Arc<dyn CacheBackend>,
    breaker: Arc<AvailabilityBreaker>,
    ttl: Duration,
}

impl InvalidationIndex {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        breaker: Arc<AvailabilityBreaker>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            breaker,
            ttl,
        }
    }

    /// Back-reference keys for a result built from `record_ids` and
    /// `field_names`.
    pub fn targets<'a>(
        record_ids: impl IntoIterator<Item = RecordId>,
        field_names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<BackendKey> {
        record_ids
            .into_iter()
            .map(BackendKey::Record)
            .chain(
                field_names
                    .into_iter()
                    .map(|name| BackendKey::Field(name.to_string())),
            )
            .collect()
    }

    /// Read the current lists for `targets` and merge `entry_key` into each.
    ///
    /// Returns the scope-local key to encoded list mapping, ready to be
    /// written in the same batch as the entry itself.
    pub(crate) async fn merged_back_references(
        &self,
        scope: &Scope,
        entry_key: &str,
        targets: &[BackendKey],
    ) -> Result<BTreeMap<String, Bytes>, CacheError> {
        let local_keys: Vec<String> = targets.iter().map(ToString::to_string).collect();
        if local_keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        let existing = match self
            .backend
            .get_multi(&local_keys, &scope.key_prefix())
            .await
        {
            Ok(existing) => existing,
            Err(err) => {
                self.breaker.report_failure();
                return Err(CacheError::backend("get_multi", err));
            }
        };

        let mut merged = BTreeMap::new();
        for local in local_keys {
            let mut keys = BTreeSet::from([entry_key.to_string()]);
            if let Some(raw) = existing.get(&local) {
                match decode_back_references(&local, raw) {
                    Ok(previous) => keys.extend(previous),
                    Err(err) => warn!(
                        scope = %scope,
                        key = %local,
                        error = %err,
                        "Discarding malformed back-reference list"
                    ),
                }
            }
            let encoded = encode_back_references(&keys)
                .map_err(|err| CacheError::malformed(local.clone(), err.to_string()))?;
            merged.insert(local, encoded);
        }

        Ok(merged)
    }

    /// Append `cache_key` to the lists of every record and field it depends on.
    ///
    /// Standalone form for callers that keep their own entries.
    /// `ResultCache::put` merges the same lists into its entry batch and
    /// writes both through [`Self::write_batch`] in one round trip.
    #[instrument(
        skip(self, scope, cache_key, record_ids, field_names),
        fields(scope = %scope, cache_key = %cache_key)
    )]
    pub async fn record(
        &self,
        scope: &Scope,
        cache_key: &CacheKey,
        record_ids: &[RecordId],
        field_names: &[String],
    ) -> Result<(), CacheError> {
        if !self.breaker.available() {
            return Err(CacheError::BackendUnavailable);
        }

        let entry_key = scope.full_key(&BackendKey::Entry(cache_key.clone()));
        let targets = Self::targets(
            record_ids.iter().copied(),
            field_names.iter().map(String::as_str),
        );
        let batch = self
            .merged_back_references(scope, &entry_key, &targets)
            .await?;
        if batch.is_empty() {
            return Ok(());
        }
        self.write_batch(scope, &batch).await
    }

    /// Store `batch` under the scope prefix. Any rejected key counts as a
    /// backend failure.
    pub(crate) async fn write_batch(
        &self,
        scope: &Scope,
        batch: &BTreeMap<String, Bytes>,
    ) -> Result<(), CacheError> {
        let failed = self
            .backend
            .set_multi(batch, &scope.key_prefix(), self.ttl)
            .await
            .map_err(|err| {
                self.breaker.report_failure();
                CacheError::backend("set_multi", err)
            })?;
        if failed.is_empty() {
            return Ok(());
        }

        self.breaker.report_failure();
        if failed.len() < batch.len() {
            error!(
                failed = failed.len(),
                batch = batch.len(),
                "Cache batch was partially applied; some keys were written"
            );
        }
        Err(CacheError::backend(
            "set_multi",
            BackendError::Rejected(format!("{} of {} keys not stored", failed.len(), batch.len())),
        ))
    }

    /// Delete every entry depending on `target`, plus the list itself.
    ///
    /// Returns the number of keys handed to the backend for deletion; zero
    /// when nothing depended on the target.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub async fn invalidate(
        &self,
        scope: &Scope,
        target: &InvalidationTarget,
    ) -> Result<usize, CacheError> {
        if !self.breaker.available() {
            return Err(CacheError::BackendUnavailable);
        }

        let list_key = scope.full_key(&target.backend_key());
        let raw = match self.backend.get(&list_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(0),
            Err(err) => {
                self.breaker.report_failure();
                return Err(CacheError::backend("get", err));
            }
        };

        let mut to_delete = match decode_back_references(&list_key, &raw) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "Dropping malformed back-reference list");
                Vec::new()
            }
        };
        to_delete.push(list_key);

        debug!(count = to_delete.len(), "Removing dependent cache entries");
        match self.backend.delete_multi(&to_delete).await {
            Ok(true) => {
                counter!(METRIC_INVALIDATED_KEYS).increment(to_delete.len() as u64);
                Ok(to_delete.len())
            }
            Ok(false) => {
                self.breaker.report_failure();
                error!(count = to_delete.len(), "Invalidation delete_multi failed");
                Err(CacheError::backend(
                    "delete_multi",
                    BackendError::Rejected("delete_multi reported failure".into()),
                ))
            }
            Err(err) => {
                self.breaker.report_failure();
                Err(CacheError::backend("delete_multi", err))
            }
        }
    }
}
