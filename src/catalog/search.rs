//! Query path: cache lookup, index evaluation on miss, cache population.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{debug, error, info, instrument};

use crate::cache::{
    CacheLookup, KeyCodec, QueryArguments, QueryResult, RankedRow, RecordId, ResultCache,
    ResultSet,
};

use super::error::CatalogError;
use super::index::IndexMatch;
use super::store::{Catalog, Record};

const METRIC_EVALUATE_MS: &str = "catalogcache_evaluate_ms";

/// Where a search answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Cache,
    Indexes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    pub rows: ResultSet,
    pub source: ResultSource,
    /// No index constrained the query, so every record was returned.
    pub matched_everything: bool,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.rows.ids()
    }

    pub fn ranked(&self) -> Vec<RankedRow> {
        self.rows.ranked()
    }
}

/// Running weighted intersection of index matches.
///
/// Ids intersect and weights add; `None` until the first index answers.
pub fn merge(acc: Option<IndexMatch>, next: IndexMatch) -> IndexMatch {
    match acc {
        None => next,
        Some(acc) => IndexMatch {
            rows: acc.rows.intersect(acc.weight, &next.rows, next.weight),
            weight: acc.weight + next.weight,
        },
    }
}

pub struct SearchOrchestrator {
    catalog: Arc<Catalog>,
    cache: Arc<ResultCache>,
    codec: KeyCodec,
}

impl SearchOrchestrator {
    pub fn new(catalog: Arc<Catalog>, cache: Arc<ResultCache>) -> Self {
        let codec = KeyCodec::from_config(cache.config());
        Self {
            catalog,
            cache,
            codec,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Search with a request mapping plus keyword overrides.
    pub async fn search_request(
        &self,
        request: QueryArguments,
        keywords: QueryArguments,
    ) -> SearchResults {
        self.search(&QueryArguments::from_parts(request, keywords))
            .await
    }

    #[instrument(skip(self, query), fields(scope = %self.catalog.scope()))]
    pub async fn search(&self, query: &QueryArguments) -> SearchResults {
        let scope = self.catalog.scope();
        let (key, field_names) = self.codec.canonicalize(query);

        let results = match self.cache.get(scope, &key).await {
            CacheLookup::Hit(rows) => {
                debug!(cache_key = %key, "HIT");
                self.cache.stats().record_hit(scope);
                SearchResults {
                    rows,
                    source: ResultSource::Cache,
                    matched_everything: false,
                }
            }
            CacheLookup::Miss => {
                debug!(cache_key = %key, fields = ?field_names, "MISS");
                let result = self.evaluate(query);
                self.cache.put(scope, &key, &result, &field_names).await;
                self.cache.stats().record_miss(scope);
                match result {
                    QueryResult::Matched(rows) => SearchResults {
                        rows,
                        source: ResultSource::Indexes,
                        matched_everything: false,
                    },
                    QueryResult::Everything => SearchResults {
                        rows: self.catalog.all_ids(),
                        source: ResultSource::Indexes,
                        matched_everything: true,
                    },
                }
            }
        };

        self.log_hit_rate();
        results
    }

    /// Run the query against every index, bypassing the cache.
    ///
    /// Declining indexes do not narrow the result. When all of them decline
    /// the query matches the whole catalog.
    pub fn evaluate(&self, query: &QueryArguments) -> QueryResult {
        let started_at = Instant::now();
        let merged = self
            .catalog
            .indexes()
            .iter()
            .filter_map(|index| index.apply_query(query))
            .fold(None, |acc, next| Some(merge(acc, next)));
        histogram!(METRIC_EVALUATE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        match merged {
            Some(found) => QueryResult::Matched(found.rows),
            None => QueryResult::Everything,
        }
    }

    /// Resolve a result row to its record metadata.
    ///
    /// A row the catalog no longer knows means the cache served a stale
    /// entry; the record's dependents are evicted before the error returns.
    pub async fn fetch(&self, record_id: RecordId) -> Result<Record, CatalogError> {
        if let Some(record) = self.catalog.metadata(record_id) {
            return Ok(record);
        }
        let scope = self.catalog.scope();
        error!(scope = %scope, %record_id, "Cached result references a missing record");
        self.cache.invalidate_by_record(scope, record_id).await;
        Err(CatalogError::stale(record_id))
    }

    fn log_hit_rate(&self) {
        let interval = self.cache.config().stats_log_interval();
        if interval <= 0 || self.cache.clock().now() % interval != 0 {
            return;
        }
        let scope = self.catalog.scope();
        let stats = self.cache.stats().snapshot(scope);
        if stats.hits == 0 {
            return;
        }
        if let Some(rate) = stats.hit_rate() {
            info!(
                scope = %scope,
                hits = stats.hits,
                misses = stats.misses,
                hit_rate = format!("{rate:.2}%"),
                "Cache hit rate"
            );
        }
    }
}
