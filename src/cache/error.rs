use thiserror::Error;

use super::backend::BackendError;
use super::keys::RecordId;

/// Failures inside the cache layer.
///
/// None of these reach search callers: the public cache surface logs them and
/// degrades to a miss or a no-op.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable")]
    BackendUnavailable,
    #[error("cache backend operation `{op}` failed: {source}")]
    BackendOperationFailed {
        op: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("cached value under `{key}` is malformed: {reason}")]
    MalformedCachedValue { key: String, reason: String },
    #[error("cached record id {record_id} no longer exists in the catalog")]
    StaleReference { record_id: RecordId },
}

impl CacheError {
    pub fn backend(op: &'static str, source: BackendError) -> Self {
        Self::BackendOperationFailed { op, source }
    }

    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedCachedValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
