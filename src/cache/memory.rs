//! In-process backend with TTL expiry.
//!
//! Behaves like a single memcached node: keys expire lazily on read, and a
//! flush drops everything regardless of scope.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::backend::{BackendError, CacheBackend};
use super::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: i64,
}

#[derive(Debug)]
pub struct MemoryBackend {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Whether a fully qualified key is present and unexpired.
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Number of stored keys, including expired ones not yet reaped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let now = self.clock.now();
        if let Some(stored) = self.entries.get(key)
            && stored.expires_at > now
        {
            return Some(stored.value.clone());
        }
        // Re-checked under the shard lock so a concurrent rewrite survives.
        self.entries
            .remove_if(key, |_, stored| stored.expires_at <= now);
        None
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        Ok(self.lookup(key))
    }

    async fn get_multi(
        &self,
        keys: &[String],
        prefix: &str,
    ) -> Result<HashMap<String, Bytes>, BackendError> {
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.lookup(&format!("{prefix}{key}"))
                    .map(|value| (key.clone(), value))
            })
            .collect())
    }

    async fn set_multi(
        &self,
        entries: &BTreeMap<String, Bytes>,
        prefix: &str,
        ttl: Duration,
    ) -> Result<Vec<String>, BackendError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = self.clock.now().saturating_add(ttl_secs);
        for (key, value) in entries {
            self.entries.insert(
                format!("{prefix}{key}"),
                StoredValue {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        Ok(Vec::new())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<bool, BackendError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(true)
    }

    async fn flush_all(&self) -> Result<(), BackendError> {
        self.entries.clear();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    fn batch(pairs: &[(&str, &str)]) -> BTreeMap<String, Bytes> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), Bytes::from(value.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn prefixed_round_trip() {
        let backend = MemoryBackend::default();
        let failed = backend
            .set_multi(&batch(&[("a", "1"), ("b", "2")]), "/cat/", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(failed.is_empty());

        assert_eq!(
            backend.get("/cat/a").await.unwrap(),
            Some(Bytes::from("1"))
        );
        let found = backend
            .get_multi(&["a".to_string(), "missing".to_string()], "/cat/")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("a"), Some(&Bytes::from("1")));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = MemoryBackend::new(clock.clone());
        backend
            .set_multi(&batch(&[("a", "1")]), "", Duration::from_secs(5))
            .await
            .unwrap();

        clock.advance(4);
        assert!(backend.contains("a"));
        clock.advance(1);
        assert!(!backend.contains("a"));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn rewritten_key_survives_expired_read() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = MemoryBackend::new(clock.clone());
        backend
            .set_multi(&batch(&[("a", "1")]), "", Duration::from_secs(5))
            .await
            .unwrap();
        clock.advance(5);
        assert_eq!(backend.get("a").await.unwrap(), None);

        backend
            .set_multi(&batch(&[("a", "2")]), "", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(backend.get("a").await.unwrap(), Some(Bytes::from("2")));
        // A read of a live key never reaps it.
        assert_eq!(backend.get("a").await.unwrap(), Some(Bytes::from("2")));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn delete_and_flush() {
        let backend = MemoryBackend::default();
        backend
            .set_multi(&batch(&[("a", "1"), ("b", "2"), ("c", "3")]), "", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(
            backend
                .delete_multi(&["a".to_string(), "nope".to_string()])
                .await
                .unwrap()
        );
        assert!(!backend.contains("a"));
        assert_eq!(backend.len(), 2);

        backend.flush_all().await.unwrap();
        assert!(backend.is_empty());
    }
}
