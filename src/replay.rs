//! Operation-log replay against an in-memory catalog.
//!
//! Each line of the log is one JSON object tagged by `op`:
//!
//! ```text
//! {"op": "insert", "uid": "/site/a", "record": {"status": "published"}}
//! {"op": "insert", "uid": "/site/a", "record": {...}, "idxs": ["status"], "update_metadata": false}
//! {"op": "delete", "uid": "/site/a"}
//! {"op": "search", "query": {"status": "published"}, "keywords": {"sort_on": "created"}}
//! {"op": "clear"}
//! ```
//!
//! Every search writes one JSON line to the output. Blank lines and lines
//! starting with `#` are skipped.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::cache::{
    CacheConfig, MemoryBackend, QueryArguments, RecordId, ResultCache, ScopeStats, SystemClock,
};
use crate::catalog::{
    Catalog, CatalogOptions, FieldValueIndex, MutationHooks, Record, ResultSource,
    SearchOrchestrator,
};
use crate::config::{CatalogSettings, IndexKindSetting, Settings};
use crate::infra::error::InfraError;

type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Operation {
    Insert {
        uid: String,
        record: Record,
        #[serde(default)]
        idxs: Vec<String>,
        #[serde(default = "default_update_metadata")]
        update_metadata: bool,
    },
    Delete {
        uid: String,
    },
    Search {
        #[serde(default)]
        query: JsonMap,
        #[serde(default)]
        keywords: JsonMap,
    },
    Clear,
}

fn default_update_metadata() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct SearchLine<'a> {
    line: usize,
    source: &'static str,
    everything: bool,
    ids: Vec<RecordId>,
    uids: Vec<&'a str>,
}

/// Totals after a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub operations: usize,
    pub inserts: usize,
    pub deletes: usize,
    pub searches: usize,
    pub stats: ScopeStats,
}

/// Catalog, cache and both paths wired together for one scope.
pub struct CatalogRuntime {
    catalog: Arc<Catalog>,
    cache: Arc<ResultCache>,
    hooks: MutationHooks,
    search: SearchOrchestrator,
}

impl CatalogRuntime {
    pub fn from_settings(settings: &Settings) -> Self {
        let config = CacheConfig::from(&settings.cache);
        let backend = Arc::new(MemoryBackend::default());
        let cache = Arc::new(ResultCache::new(config, backend, Arc::new(SystemClock)));
        Self::new(Arc::new(build_catalog(&settings.catalog)), cache)
    }

    pub fn new(catalog: Arc<Catalog>, cache: Arc<ResultCache>) -> Self {
        Self {
            hooks: MutationHooks::new(catalog.clone(), cache.clone()),
            search: SearchOrchestrator::new(catalog.clone(), cache.clone()),
            catalog,
            cache,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn hooks(&self) -> &MutationHooks {
        &self.hooks
    }

    pub fn search(&self) -> &SearchOrchestrator {
        &self.search
    }

    /// Replay the log at `path`, writing one line per search to `out`.
    #[instrument(skip(self, out), fields(scope = %self.catalog.scope()))]
    pub async fn replay(
        &self,
        path: &Path,
        out: &mut (dyn Write + Send),
    ) -> Result<ReplaySummary, InfraError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let mut summary = ReplaySummary::default();

        for (index, raw) in contents.lines().enumerate() {
            let line = index + 1;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let operation: Operation = serde_json::from_str(raw)
                .map_err(|err| InfraError::operation(line, err.to_string()))?;
            summary.operations += 1;

            match operation {
                Operation::Insert {
                    uid,
                    record,
                    idxs,
                    update_metadata,
                } => {
                    let options = CatalogOptions {
                        idxs,
                        update_metadata,
                    };
                    self.hooks
                        .catalog_object_with(&record, &uid, &options)
                        .await
                        .map_err(|err| InfraError::operation(line, err.to_string()))?;
                    summary.inserts += 1;
                }
                Operation::Delete { uid } => {
                    if self.hooks.uncatalog_object(&uid).await.is_some() {
                        summary.deletes += 1;
                    }
                }
                Operation::Search { query, keywords } => {
                    self.run_search(line, query, keywords, out).await?;
                    summary.searches += 1;
                }
                Operation::Clear => self.hooks.clear().await,
            }
        }

        summary.stats = self.cache.stats().snapshot(self.catalog.scope());
        info!(
            operations = summary.operations,
            searches = summary.searches,
            hits = summary.stats.hits,
            misses = summary.stats.misses,
            "Replay complete"
        );
        Ok(summary)
    }

    async fn run_search(
        &self,
        line: usize,
        query: JsonMap,
        keywords: JsonMap,
        out: &mut (dyn Write + Send),
    ) -> Result<(), InfraError> {
        let results = self
            .search
            .search_request(QueryArguments::from(query), QueryArguments::from(keywords))
            .await;

        let ids = results.ids();
        let mut uids = Vec::with_capacity(ids.len());
        for record_id in &ids {
            if let Err(err) = self.search.fetch(*record_id).await {
                match err.stale_record() {
                    Some(record_id) => {
                        warn!(line, %record_id, "Skipping stale row");
                        continue;
                    }
                    None => return Err(InfraError::operation(line, err.to_string())),
                }
            }
            if let Some(uid) = self.catalog.uid(*record_id) {
                uids.push(uid);
            }
        }

        let output = SearchLine {
            line,
            source: match results.source {
                ResultSource::Cache => "cache",
                ResultSource::Indexes => "indexes",
            },
            everything: results.matched_everything,
            ids,
            uids: uids.iter().map(String::as_str).collect(),
        };
        let encoded = serde_json::to_string(&output)
            .map_err(|err| InfraError::operation(line, err.to_string()))?;
        writeln!(out, "{encoded}")?;
        Ok(())
    }
}

/// Build an empty catalog with the configured indexes.
pub fn build_catalog(settings: &CatalogSettings) -> Catalog {
    settings
        .indexes
        .iter()
        .fold(
            Catalog::new(crate::cache::Scope::new(settings.scope.clone())),
            |catalog, index| {
                let field = match index.kind {
                    IndexKindSetting::Field => FieldValueIndex::new(index.name.clone()),
                    IndexKindSetting::Keyword => FieldValueIndex::keywords(index.name.clone()),
                };
                let field = match index.attribute.as_ref() {
                    Some(attribute) => field.reading(attribute.clone()),
                    None => field,
                };
                catalog.with_index(field.with_weight(index.weight.get()))
            },
        )
}
