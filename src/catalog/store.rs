//! Record storage: uid to record id mapping plus per-record metadata.
//!
//! The catalog owns the field indexes it is searched through but does no
//! cache bookkeeping itself; mutations that must keep the result cache
//! correct go through [`MutationHooks`](super::hooks::MutationHooks).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::cache::{QueryValue, RecordId, ResultSet, Scope};
use crate::util::lock::{rw_read, rw_write};

use super::error::CatalogError;
use super::index::FieldIndex;

const SOURCE: &str = "catalog::store";

/// Attributes of one cataloged object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "serde_json::Map<String, serde_json::Value>")]
pub struct Record {
    attributes: BTreeMap<String, QueryValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&QueryValue> {
        self.attributes.get(attribute)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.attributes
            .iter()
            .map(|(attribute, value)| (attribute.as_str(), value))
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Record {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            attributes: map
                .into_iter()
                .map(|(attribute, value)| (attribute, QueryValue::from(value)))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    uids: HashMap<String, RecordId>,
    paths: BTreeMap<RecordId, String>,
    metadata: BTreeMap<RecordId, Record>,
    next_record_id: u64,
}

pub struct Catalog {
    scope: Scope,
    indexes: Vec<Arc<dyn FieldIndex>>,
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            indexes: Vec::new(),
            state: RwLock::new(CatalogState::default()),
        }
    }

    pub fn with_index(mut self, index: impl FieldIndex + 'static) -> Self {
        self.indexes.push(Arc::new(index));
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Indexes in registration order; search evaluates them in this order.
    pub fn indexes(&self) -> &[Arc<dyn FieldIndex>] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Result<&Arc<dyn FieldIndex>, CatalogError> {
        self.indexes
            .iter()
            .find(|index| index.name() == name)
            .ok_or_else(|| CatalogError::UnknownIndex(name.to_string()))
    }

    pub fn len(&self) -> usize {
        rw_read(&self.state, SOURCE, "len").paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record_id(&self, uid: &str) -> Option<RecordId> {
        rw_read(&self.state, SOURCE, "record_id")
            .uids
            .get(uid)
            .copied()
    }

    pub fn uid(&self, record_id: RecordId) -> Option<String> {
        rw_read(&self.state, SOURCE, "uid")
            .paths
            .get(&record_id)
            .cloned()
    }

    pub fn metadata(&self, record_id: RecordId) -> Option<Record> {
        rw_read(&self.state, SOURCE, "metadata")
            .metadata
            .get(&record_id)
            .cloned()
    }

    /// Every cataloged record id, unscored.
    pub fn all_ids(&self) -> ResultSet {
        rw_read(&self.state, SOURCE, "all_ids")
            .paths
            .keys()
            .copied()
            .collect()
    }

    /// Record id for `uid`, allocating a fresh one for unknown uids.
    ///
    /// The flag is true when the uid was already cataloged.
    pub(crate) fn assign(&self, uid: &str) -> (RecordId, bool) {
        let mut state = rw_write(&self.state, SOURCE, "assign");
        if let Some(record_id) = state.uids.get(uid) {
            return (*record_id, true);
        }
        state.next_record_id += 1;
        let record_id = RecordId(state.next_record_id);
        state.uids.insert(uid.to_string(), record_id);
        state.paths.insert(record_id, uid.to_string());
        (record_id, false)
    }

    pub(crate) fn set_metadata(&self, record_id: RecordId, record: Record) {
        rw_write(&self.state, SOURCE, "set_metadata")
            .metadata
            .insert(record_id, record);
    }

    /// Drop the mapping and metadata of `uid`.
    pub(crate) fn remove(&self, uid: &str) -> Option<RecordId> {
        let mut state = rw_write(&self.state, SOURCE, "remove");
        let record_id = state.uids.remove(uid)?;
        state.paths.remove(&record_id);
        state.metadata.remove(&record_id);
        Some(record_id)
    }

    /// Forget every record and reset every index. Record ids are not reused.
    pub(crate) fn clear(&self) {
        {
            let mut state = rw_write(&self.state, SOURCE, "clear");
            state.uids.clear();
            state.paths.clear();
            state.metadata.clear();
        }
        for index in &self.indexes {
            index.clear();
        }
    }
}
