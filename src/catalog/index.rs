//! Field indexes.
//!
//! An index answers the part of a query that names its field and declines
//! everything else. The catalog calls [`FieldIndex::entry_for`] around each
//! re-index so that a change in what an index stores for a record can evict
//! the cached results that were built from that field.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use crate::cache::{QueryArguments, QueryValue, RecordId, ResultSet};
use crate::util::lock::{rw_read, rw_write};

use super::store::Record;

const SOURCE: &str = "catalog::index";

/// Rows an index matched, with the weight they carry into intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub rows: ResultSet,
    pub weight: u32,
}

pub trait FieldIndex: Send + Sync {
    /// Field name this index answers for; also the query argument it reads.
    fn name(&self) -> &str;

    /// Rows matching the query, or `None` when the query does not constrain
    /// this field.
    fn apply_query(&self, query: &QueryArguments) -> Option<IndexMatch>;

    fn index_record(&self, record_id: RecordId, record: &Record);

    fn unindex_record(&self, record_id: RecordId);

    /// What the index currently stores for `record_id`.
    fn entry_for(&self, record_id: RecordId) -> Option<QueryValue>;

    fn clear(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    /// One term per record: the attribute value itself.
    Field,
    /// One term per element of a sequence attribute.
    Keyword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Or,
    And,
}

#[derive(Debug, Default)]
struct IndexState {
    forward: BTreeMap<String, BTreeSet<RecordId>>,
    stored: HashMap<RecordId, QueryValue>,
}

impl IndexState {
    fn remove(&mut self, record_id: RecordId, kind: IndexKind) -> Option<QueryValue> {
        let previous = self.stored.remove(&record_id)?;
        for term in terms(&previous, kind) {
            if let Some(rows) = self.forward.get_mut(&term) {
                rows.remove(&record_id);
                if rows.is_empty() {
                    self.forward.remove(&term);
                }
            }
        }
        Some(previous)
    }

    fn rows(&self, term: &str) -> BTreeSet<RecordId> {
        self.forward.get(term).cloned().unwrap_or_default()
    }
}

/// In-memory exact-value index over one record attribute.
#[derive(Debug)]
pub struct FieldValueIndex {
    name: String,
    attribute: String,
    kind: IndexKind,
    weight: u32,
    state: RwLock<IndexState>,
}

impl FieldValueIndex {
    /// Index the whole attribute value as a single term.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name.into(), IndexKind::Field)
    }

    /// Index every element of a sequence attribute as its own term.
    pub fn keywords(name: impl Into<String>) -> Self {
        Self::with_kind(name.into(), IndexKind::Keyword)
    }

    fn with_kind(name: String, kind: IndexKind) -> Self {
        Self {
            attribute: name.clone(),
            name,
            kind,
            weight: 1,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Read values from `attribute` instead of the attribute named like the
    /// index.
    pub fn reading(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        rw_read(&self.state, SOURCE, "term_count").forward.len()
    }

    fn lookup(&self, terms: &[String], operator: Operator) -> BTreeSet<RecordId> {
        let state = rw_read(&self.state, SOURCE, "lookup");
        let mut sets = terms.iter().map(|term| state.rows(term));
        let Some(first) = sets.next() else {
            return BTreeSet::new();
        };
        sets.fold(first, |acc, rows| match operator {
            Operator::Or => acc.union(&rows).copied().collect(),
            Operator::And => acc.intersection(&rows).copied().collect(),
        })
    }
}

impl FieldIndex for FieldValueIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_query(&self, query: &QueryArguments) -> Option<IndexMatch> {
        let (value, operator) = parse_query(query.get(&self.name)?)?;
        let wanted = query_terms(value);
        if wanted.is_empty() {
            return None;
        }
        Some(IndexMatch {
            rows: ResultSet::Ids(self.lookup(&wanted, operator)),
            weight: self.weight,
        })
    }

    fn index_record(&self, record_id: RecordId, record: &Record) {
        let value = record
            .get(&self.attribute)
            .filter(|value| !terms(value, self.kind).is_empty());
        let mut state = rw_write(&self.state, SOURCE, "index_record");
        let Some(value) = value else {
            state.remove(record_id, self.kind);
            return;
        };
        if state.stored.get(&record_id) == Some(value) {
            return;
        }
        state.remove(record_id, self.kind);
        for term in terms(value, self.kind) {
            state.forward.entry(term).or_default().insert(record_id);
        }
        state.stored.insert(record_id, value.clone());
    }

    fn unindex_record(&self, record_id: RecordId) {
        rw_write(&self.state, SOURCE, "unindex_record").remove(record_id, self.kind);
    }

    fn entry_for(&self, record_id: RecordId) -> Option<QueryValue> {
        rw_read(&self.state, SOURCE, "entry_for")
            .stored
            .get(&record_id)
            .cloned()
    }

    fn clear(&self) {
        *rw_write(&self.state, SOURCE, "clear") = IndexState::default();
    }
}

/// Split `{"query": ..., "operator": ...}` options from a plain value.
fn parse_query(value: &QueryValue) -> Option<(&QueryValue, Operator)> {
    if value.is_blank() {
        return None;
    }
    let QueryValue::Map(options) = value else {
        return Some((value, Operator::Or));
    };
    let inner = options.get("query").filter(|inner| !inner.is_blank())?;
    let operator = match options.get("operator").and_then(QueryValue::term) {
        Some(operator) if operator.eq_ignore_ascii_case("and") => Operator::And,
        _ => Operator::Or,
    };
    Some((inner, operator))
}

fn query_terms(value: &QueryValue) -> Vec<String> {
    match value {
        QueryValue::List(items) | QueryValue::Set(items) => {
            items.iter().filter_map(QueryValue::term).collect()
        }
        other => other.term().into_iter().collect(),
    }
}

fn terms(value: &QueryValue, kind: IndexKind) -> Vec<String> {
    match (kind, value) {
        (IndexKind::Keyword, QueryValue::List(items) | QueryValue::Set(items)) => {
            let unique: BTreeSet<String> = items.iter().filter_map(QueryValue::term).collect();
            unique.into_iter().collect()
        }
        _ => value.term().into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> ResultSet {
        values.iter().copied().map(RecordId).collect()
    }

    fn status_index() -> FieldValueIndex {
        let index = FieldValueIndex::new("status");
        index.index_record(RecordId(1), &Record::new().with("status", "published"));
        index.index_record(RecordId(2), &Record::new().with("status", "draft"));
        index.index_record(RecordId(3), &Record::new().with("status", "published"));
        index
    }

    fn json_query(text: &str) -> QueryArguments {
        serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(text)
            .unwrap()
            .into()
    }

    fn matched(index: &FieldValueIndex, query: QueryArguments) -> Option<ResultSet> {
        index.apply_query(&query).map(|found| found.rows)
    }

    #[test]
    fn exact_and_any_of_queries() {
        let index = status_index();
        assert_eq!(
            matched(&index, QueryArguments::new().with("status", "published")),
            Some(ids(&[1, 3]))
        );
        assert_eq!(
            matched(
                &index,
                QueryArguments::new().with("status", vec!["draft", "published"])
            ),
            Some(ids(&[1, 2, 3]))
        );
        assert_eq!(
            matched(&index, QueryArguments::new().with("status", "pending")),
            Some(ResultSet::default())
        );
    }

    #[test]
    fn declines_unrelated_or_blank_arguments() {
        let index = status_index();
        assert!(index.apply_query(&QueryArguments::new()).is_none());
        assert!(
            index
                .apply_query(&QueryArguments::new().with("owner", "alice"))
                .is_none()
        );
        assert!(
            index
                .apply_query(&QueryArguments::new().with("status", ""))
                .is_none()
        );
        assert!(
            index
                .apply_query(&QueryArguments::new().with("status", Vec::<String>::new()))
                .is_none()
        );
    }

    #[test]
    fn keyword_operator_and_narrows() {
        let index = FieldValueIndex::keywords("subject");
        index.index_record(RecordId(1), &Record::new().with("subject", vec!["rust", "cache"]));
        index.index_record(RecordId(2), &Record::new().with("subject", vec!["rust"]));

        let or_query = json_query(r#"{"subject": {"query": ["rust", "cache"]}}"#);
        assert_eq!(matched(&index, or_query), Some(ids(&[1, 2])));

        let and_query =
            json_query(r#"{"subject": {"query": ["rust", "cache"], "operator": "and"}}"#);
        assert_eq!(matched(&index, and_query), Some(ids(&[1])));
    }

    #[test]
    fn reindex_moves_record_between_terms() {
        let index = status_index();
        index.index_record(RecordId(1), &Record::new().with("status", "draft"));

        assert_eq!(index.entry_for(RecordId(1)), Some(QueryValue::from("draft")));
        assert_eq!(
            matched(&index, QueryArguments::new().with("status", "published")),
            Some(ids(&[3]))
        );
        assert_eq!(
            matched(&index, QueryArguments::new().with("status", "draft")),
            Some(ids(&[1, 2]))
        );
    }

    #[test]
    fn missing_attribute_unindexes() {
        let index = status_index();
        index.index_record(RecordId(2), &Record::new().with("title", "no status"));
        assert_eq!(index.entry_for(RecordId(2)), None);
        assert_eq!(index.term_count(), 1);

        index.unindex_record(RecordId(1));
        index.unindex_record(RecordId(3));
        assert_eq!(index.term_count(), 0);
    }

    #[test]
    fn weight_and_source_attribute_are_configurable() {
        let index = FieldValueIndex::new("state").reading("status").with_weight(3);
        index.index_record(RecordId(5), &Record::new().with("status", "published"));
        let found = index
            .apply_query(&QueryArguments::new().with("state", "published"))
            .unwrap();
        assert_eq!(found.weight, 3);
        assert_eq!(found.rows, ids(&[5]));
    }
}
