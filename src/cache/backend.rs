//! Key-value cache backend contract.
//!
//! Mirrors the memcached client surface the cache layer relies on. Keys
//! passed with a `prefix` are scope-local; the implementation prepends the
//! prefix on the wire and reports keys back without it.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache backend timed out during `{op}`")]
    Timeout { op: &'static str },
    #[error("cache backend transport failure: {0}")]
    Transport(String),
    #[error("cache backend rejected the request: {0}")]
    Rejected(String),
}

/// Cache backend trait for pluggable key-value stores.
///
/// Implementations own their per-call timeouts; a timed-out call must come
/// back as `BackendError::Timeout` instead of blocking.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a single fully qualified key.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    /// Fetch several keys under `prefix`. Missing keys are simply absent
    /// from the returned map, which is keyed without the prefix.
    async fn get_multi(
        &self,
        keys: &[String],
        prefix: &str,
    ) -> Result<HashMap<String, Bytes>, BackendError>;

    /// Store several keys under `prefix` with a shared TTL.
    ///
    /// Returns the keys that could not be stored; empty means success.
    async fn set_multi(
        &self,
        entries: &BTreeMap<String, Bytes>,
        prefix: &str,
        ttl: Duration,
    ) -> Result<Vec<String>, BackendError>;

    /// Delete fully qualified keys. Returns false if the backend reported a
    /// failure for the batch.
    async fn delete_multi(&self, keys: &[String]) -> Result<bool, BackendError>;

    /// Drop every key in the backend, across all scopes.
    async fn flush_all(&self) -> Result<(), BackendError>;

    /// Name of the backend implementation, for logs.
    fn provider_name(&self) -> &'static str;
}
