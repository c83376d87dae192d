//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use catalogcache::cache::{
    BackendError, CacheBackend, CacheConfig, ManualClock, MemoryBackend, ResultCache, Scope,
};
use catalogcache::catalog::{
    Catalog, FieldValueIndex, MutationHooks, Record, SearchOrchestrator,
};

pub const T0: i64 = 1_700_000_001;
pub const SCOPE: &str = "/site/catalog";

/// Memory backend with switchable faults: every call failing, one operation
/// failing, writes rejecting a key, or deletes reporting failure.
#[derive(Debug)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    failing: AtomicBool,
    failing_op: Mutex<Option<&'static str>>,
    rejecting_writes: AtomicBool,
    refusing_deletes: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: MemoryBackend::new(clock),
            failing: AtomicBool::new(false),
            failing_op: Mutex::new(None),
            rejecting_writes: AtomicBool::new(false),
            refusing_deletes: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only `op` with a timeout; `None` heals it.
    pub fn set_failing_op(&self, op: Option<&'static str>) {
        *self.failing_op.lock().unwrap() = op;
    }

    /// `set_multi` stores every key but the first and reports that one failed.
    pub fn set_rejecting_writes(&self, rejecting: bool) {
        self.rejecting_writes.store(rejecting, Ordering::SeqCst);
    }

    /// `delete_multi` deletes nothing and returns `Ok(false)`.
    pub fn set_refusing_deletes(&self, refusing: bool) {
        self.refusing_deletes.store(refusing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    fn check(&self, op: &'static str) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) || *self.failing_op.lock().unwrap() == Some(op) {
            return Err(BackendError::Timeout { op });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn get_multi(
        &self,
        keys: &[String],
        prefix: &str,
    ) -> Result<HashMap<String, Bytes>, BackendError> {
        self.check("get_multi")?;
        self.inner.get_multi(keys, prefix).await
    }

    async fn set_multi(
        &self,
        entries: &BTreeMap<String, Bytes>,
        prefix: &str,
        ttl: Duration,
    ) -> Result<Vec<String>, BackendError> {
        self.check("set_multi")?;
        if !self.rejecting_writes.load(Ordering::SeqCst) {
            return self.inner.set_multi(entries, prefix, ttl).await;
        }
        let mut stored = entries.clone();
        let Some((rejected, _)) = stored.pop_first() else {
            return Ok(Vec::new());
        };
        self.inner.set_multi(&stored, prefix, ttl).await?;
        Ok(vec![rejected])
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<bool, BackendError> {
        self.check("delete_multi")?;
        if self.refusing_deletes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.delete_multi(keys).await
    }

    async fn flush_all(&self) -> Result<(), BackendError> {
        self.check("flush_all")?;
        self.inner.flush_all().await
    }

    fn provider_name(&self) -> &'static str {
        "flaky"
    }
}

/// A catalog with `status`, `owner` and keyword `subject` indexes, its cache
/// and both paths.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub backend: Arc<FlakyBackend>,
    pub catalog: Arc<Catalog>,
    pub cache: Arc<ResultCache>,
    pub hooks: MutationHooks,
    pub search: SearchOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let backend = Arc::new(FlakyBackend::new(clock.clone()));
        let cache = Arc::new(ResultCache::new(config, backend.clone(), clock.clone()));
        let catalog = Arc::new(
            Catalog::new(Scope::new(SCOPE))
                .with_index(FieldValueIndex::new("status"))
                .with_index(FieldValueIndex::new("owner"))
                .with_index(FieldValueIndex::keywords("subject")),
        );
        Self {
            clock,
            backend,
            hooks: MutationHooks::new(catalog.clone(), cache.clone()),
            search: SearchOrchestrator::new(catalog.clone(), cache.clone()),
            catalog,
            cache,
        }
    }

    pub fn scope(&self) -> &Scope {
        self.catalog.scope()
    }
}

pub fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .fold(Record::new(), |record, (attribute, value)| {
            record.with(*attribute, *value)
        })
}
