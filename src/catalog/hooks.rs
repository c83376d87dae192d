//! Write path: catalog mutations that keep the result cache correct.
//!
//! Updating a record evicts every result that contained it. Re-indexing
//! evicts every result whose query touched a field whose stored entry for
//! the record changed, which also covers newly matching records.

use std::sync::Arc;

use tracing::{debug, error, instrument};

use crate::cache::{RecordId, ResultCache};

use super::error::CatalogError;
use super::index::FieldIndex;
use super::store::{Catalog, Record};

/// Options for a targeted (re-)index.
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Only these indexes are updated. Empty means all of them.
    pub idxs: Vec<String>,
    /// Replace the stored metadata of an existing record.
    pub update_metadata: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            idxs: Vec::new(),
            update_metadata: true,
        }
    }
}

pub struct MutationHooks {
    catalog: Arc<Catalog>,
    cache: Arc<ResultCache>,
}

impl MutationHooks {
    pub fn new(catalog: Arc<Catalog>, cache: Arc<ResultCache>) -> Self {
        Self { catalog, cache }
    }

    /// Insert or update `record` under `uid`, updating every index.
    pub async fn catalog_object(&self, record: &Record, uid: &str) -> Result<RecordId, CatalogError> {
        self.catalog_object_with(record, uid, &CatalogOptions::default())
            .await
    }

    #[instrument(skip(self, record, options), fields(scope = %self.catalog.scope()))]
    pub async fn catalog_object_with(
        &self,
        record: &Record,
        uid: &str,
        options: &CatalogOptions,
    ) -> Result<RecordId, CatalogError> {
        let indexes = self.selected_indexes(&options.idxs)?;
        let scope = self.catalog.scope();

        let (record_id, existed) = self.catalog.assign(uid);
        if existed {
            self.cache.invalidate_by_record(scope, record_id).await;
        }
        if !existed || options.update_metadata {
            self.catalog.set_metadata(record_id, record.clone());
        }

        for index in indexes {
            let before = index.entry_for(record_id);
            index.index_record(record_id, record);
            if index.entry_for(record_id) != before {
                debug!(%record_id, field = index.name(), "Index entry changed");
                self.cache.invalidate_by_field(scope, index.name()).await;
            }
        }

        Ok(record_id)
    }

    /// Remove `uid` from the catalog. Unknown uids are logged and ignored.
    #[instrument(skip(self), fields(scope = %self.catalog.scope()))]
    pub async fn uncatalog_object(&self, uid: &str) -> Option<RecordId> {
        let scope = self.catalog.scope();
        let Some(record_id) = self.catalog.record_id(uid) else {
            error!(uid, "Attempt to uncatalog an object that was never cataloged");
            return None;
        };

        self.cache.invalidate_by_record(scope, record_id).await;
        for index in self.catalog.indexes() {
            index.unindex_record(record_id);
        }
        self.catalog.remove(uid)
    }

    /// Empty the catalog and flush the cache.
    pub async fn clear(&self) {
        self.catalog.clear();
        self.cache.flush(self.catalog.scope()).await;
    }

    fn selected_indexes(&self, names: &[String]) -> Result<Vec<Arc<dyn FieldIndex>>, CatalogError> {
        if names.is_empty() {
            return Ok(self.catalog.indexes().to_vec());
        }
        names
            .iter()
            .map(|name| self.catalog.index(name).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        BackendKey, CacheConfig, ManualClock, MemoryBackend, QueryArguments, QueryValue, Scope,
    };
    use crate::catalog::index::FieldValueIndex;
    use crate::catalog::search::{ResultSource, SearchOrchestrator};

    const T0: i64 = 1_700_000_001;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        catalog: Arc<Catalog>,
        hooks: MutationHooks,
        search: SearchOrchestrator,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let backend = Arc::new(MemoryBackend::new(clock.clone()));
        let cache = Arc::new(ResultCache::new(
            CacheConfig::default(),
            backend.clone(),
            clock,
        ));
        let catalog = Arc::new(
            Catalog::new(Scope::new("/site/catalog"))
                .with_index(FieldValueIndex::new("status"))
                .with_index(FieldValueIndex::new("owner")),
        );
        Fixture {
            backend,
            catalog: catalog.clone(),
            hooks: MutationHooks::new(catalog.clone(), cache.clone()),
            search: SearchOrchestrator::new(catalog, cache),
        }
    }

    fn published() -> QueryArguments {
        QueryArguments::new().with("status", "published")
    }

    #[tokio::test]
    async fn inserting_a_matching_record_evicts_field_dependents() {
        let fixture = fixture();
        assert!(fixture.search.search(&published()).await.is_empty());
        assert_eq!(
            fixture.search.search(&published()).await.source,
            ResultSource::Cache
        );

        fixture
            .hooks
            .catalog_object(&Record::new().with("status", "published"), "/a")
            .await
            .unwrap();

        let results = fixture.search.search(&published()).await;
        assert_eq!(results.source, ResultSource::Indexes);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn unchanged_reindex_keeps_field_entries() {
        let fixture = fixture();
        let record = Record::new().with("status", "published").with("owner", "ann");
        fixture.hooks.catalog_object(&record, "/a").await.unwrap();
        let by_owner = QueryArguments::new().with("owner", "bob");
        fixture.search.search(&by_owner).await;

        fixture.hooks.catalog_object(&record, "/a").await.unwrap();

        assert_eq!(
            fixture.search.search(&by_owner).await.source,
            ResultSource::Cache
        );
    }

    #[tokio::test]
    async fn targeted_reindex_touches_named_indexes_only() {
        let fixture = fixture();
        let record_id = fixture
            .hooks
            .catalog_object(&Record::new().with("status", "draft").with("owner", "ann"), "/a")
            .await
            .unwrap();

        let options = CatalogOptions {
            idxs: vec!["status".to_string()],
            update_metadata: false,
        };
        fixture
            .hooks
            .catalog_object_with(
                &Record::new().with("status", "published").with("owner", "bob"),
                "/a",
                &options,
            )
            .await
            .unwrap();

        let status = fixture.catalog.index("status").unwrap();
        let owner = fixture.catalog.index("owner").unwrap();
        assert_eq!(status.entry_for(record_id), Some(QueryValue::from("published")));
        assert_eq!(owner.entry_for(record_id), Some(QueryValue::from("ann")));
        assert_eq!(
            fixture.catalog.metadata(record_id).unwrap().get("status"),
            Some(&QueryValue::from("draft"))
        );
    }

    #[tokio::test]
    async fn unknown_index_name_is_rejected_before_any_change() {
        let fixture = fixture();
        let options = CatalogOptions {
            idxs: vec!["missing".to_string()],
            ..Default::default()
        };
        let err = fixture
            .hooks
            .catalog_object_with(&Record::new().with("status", "draft"), "/a", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownIndex(_)));
        assert!(fixture.catalog.is_empty());
    }

    #[tokio::test]
    async fn uncatalog_unknown_uid_is_ignored() {
        let fixture = fixture();
        assert_eq!(fixture.hooks.uncatalog_object("/nope").await, None);
    }

    #[tokio::test]
    async fn uncatalog_removes_record_and_its_dependents() {
        let fixture = fixture();
        let record_id = fixture
            .hooks
            .catalog_object(&Record::new().with("status", "published"), "/a")
            .await
            .unwrap();
        fixture.search.search(&published()).await;

        assert_eq!(fixture.hooks.uncatalog_object("/a").await, Some(record_id));

        let results = fixture.search.search(&published()).await;
        assert_eq!(results.source, ResultSource::Indexes);
        assert!(results.is_empty());
        assert!(
            !fixture
                .backend
                .contains(&fixture.catalog.scope().full_key(&BackendKey::Record(record_id)))
        );
    }

    #[tokio::test]
    async fn clear_empties_catalog_and_cache() {
        let fixture = fixture();
        fixture
            .hooks
            .catalog_object(&Record::new().with("status", "published"), "/a")
            .await
            .unwrap();
        fixture.search.search(&published()).await;

        fixture.hooks.clear().await;

        assert!(fixture.catalog.is_empty());
        assert!(fixture.backend.is_empty());
        let results = fixture.search.search(&published()).await;
        assert!(results.is_empty());
    }
}
