use thiserror::Error;

use crate::cache::{CacheError, RecordId};

/// Failures surfaced by the catalog to its callers.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog has no index named `{0}`")]
    UnknownIndex(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl CatalogError {
    pub fn stale(record_id: RecordId) -> Self {
        Self::Cache(CacheError::StaleReference { record_id })
    }

    /// The record id a stale cached row pointed at.
    pub fn stale_record(&self) -> Option<RecordId> {
        match self {
            Self::Cache(CacheError::StaleReference { record_id }) => Some(*record_id),
            _ => None,
        }
    }
}
