//! Cache key definitions and query canonicalization.
//!
//! Defines the query argument model, the scope/record identifiers that
//! partition the backend, and `KeyCodec`, which turns a query bundle into a
//! stable `CacheKey`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::config::CacheConfig;

/// Internal catalog identifier of a record, distinct from its unique id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Namespace of one catalog instance inside a shared backend.
///
/// Built from the catalog's hierarchical location, e.g. `/site/catalog`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope(String);

impl Scope {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Join path segments the way a physical path is rendered.
    pub fn from_path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|segment| segment.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix applied at the backend boundary to every key of this scope.
    pub fn key_prefix(&self) -> String {
        format!("{}/", self.0)
    }

    /// Fully qualified backend key, as stored inside back-reference lists.
    pub fn full_key(&self, key: &BackendKey) -> String {
        format!("{}{}", self.key_prefix(), key)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest identifying a canonical query bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already computed digest.
    pub fn from_raw(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scope-local backend keys.
///
/// Kinds are tagged so a field named like a record id, or like a digest,
/// can never alias another kind of entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKey {
    /// A cached result set.
    Entry(CacheKey),
    /// Back-references of a record id.
    Record(RecordId),
    /// Back-references of a field index.
    Field(String),
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKey::Entry(key) => write!(f, "q:{key}"),
            BackendKey::Record(id) => write!(f, "r:{id}"),
            BackendKey::Field(name) => write!(f, "f:{name}"),
        }
    }
}

/// A single query argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(OffsetDateTime),
    /// Ordered sequence. Sorted for key derivation only at the top level,
    /// since nested sequences (e.g. `[min, max]` ranges) are positional.
    List(Vec<QueryValue>),
    /// Unordered sequence. Always sorted for key derivation.
    Set(Vec<QueryValue>),
    /// Nested options such as `{"query": [...], "operator": "and"}`.
    Map(BTreeMap<String, QueryValue>),
    /// A value with no structural rule; keyed by its textual form.
    Opaque(String),
}

impl QueryValue {
    pub fn opaque(value: impl fmt::Display) -> Self {
        Self::Opaque(value.to_string())
    }

    /// Index term for scalar values, `None` for structured ones.
    pub fn term(&self) -> Option<String> {
        match self {
            QueryValue::Bool(value) => Some(value.to_string()),
            QueryValue::Int(value) => Some(value.to_string()),
            QueryValue::Float(value) => Some(value.to_string()),
            QueryValue::Text(value) | QueryValue::Opaque(value) => Some(value.clone()),
            QueryValue::Timestamp(value) => Some(value.unix_timestamp().to_string()),
            QueryValue::Null
            | QueryValue::List(_)
            | QueryValue::Set(_)
            | QueryValue::Map(_) => None,
        }
    }

    /// True for values a field index treats as "no constraint".
    pub fn is_blank(&self) -> bool {
        match self {
            QueryValue::Null => true,
            QueryValue::Text(value) => value.is_empty(),
            QueryValue::List(items) | QueryValue::Set(items) => items.is_empty(),
            QueryValue::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<OffsetDateTime> for QueryValue {
    fn from(value: OffsetDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<QueryValue>> From<Vec<T>> for QueryValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for QueryValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(number) => match number.as_i64() {
                Some(int) => Self::Int(int),
                None => number
                    .as_f64()
                    .map(Self::Float)
                    .unwrap_or_else(|| Self::opaque(number)),
            },
            Value::String(text) => Self::Text(text),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Query bundle: field name to argument value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryArguments {
    fields: BTreeMap<String, QueryValue>,
}

impl QueryArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a request mapping with keyword arguments; keywords win on conflict.
    pub fn from_parts(request: QueryArguments, keywords: QueryArguments) -> Self {
        let mut fields = request.fields;
        fields.extend(keywords.fields);
        Self { fields }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<QueryValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&QueryValue> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.fields
            .iter()
            .map(|(field, value)| (field.as_str(), value))
    }

    /// Top-level field names, sorted.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<QueryValue>> FromIterator<(K, V)> for QueryArguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        }
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for QueryArguments {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        map.into_iter()
            .map(|(field, value)| (field, QueryValue::from(value)))
            .collect()
    }
}

/// Canonical, totally ordered form of a query value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
enum Canonical {
    Null,
    Bool(bool),
    Int(i64),
    Float(String),
    Text(String),
    Time(i64),
    Seq(Vec<Canonical>),
    Map(Vec<(String, Canonical)>),
    Opaque(String),
}

/// Derives cache keys from query bundles.
#[derive(Debug, Clone, Copy)]
pub struct KeyCodec {
    granularity_secs: i64,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl KeyCodec {
    /// Create a codec truncating timestamps to `granularity_secs`.
    pub fn new(granularity_secs: i64) -> Self {
        Self {
            granularity_secs: granularity_secs.max(1),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.timestamp_granularity())
    }

    /// Compute the cache key and the touched field names for `query`.
    ///
    /// Never fails: the canonical form falls back to its debug rendering if
    /// serialization is refused.
    pub fn canonicalize(&self, query: &QueryArguments) -> (CacheKey, Vec<String>) {
        let canonical: Vec<(&str, Canonical)> = query
            .iter()
            .map(|(field, value)| (field, self.top_level(value)))
            .collect();

        let text =
            serde_json::to_string(&canonical).unwrap_or_else(|_| format!("{canonical:?}"));

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let key = CacheKey(hex::encode(hasher.finalize()));

        (key, query.field_names())
    }

    fn top_level(&self, value: &QueryValue) -> Canonical {
        match value {
            QueryValue::List(items) => Canonical::Seq(self.sorted(items)),
            _ => self.nested(value),
        }
    }

    fn nested(&self, value: &QueryValue) -> Canonical {
        match value {
            QueryValue::Null => Canonical::Null,
            QueryValue::Bool(value) => Canonical::Bool(*value),
            QueryValue::Int(value) => Canonical::Int(*value),
            QueryValue::Float(value) => Canonical::Float(format!("{value:?}")),
            QueryValue::Text(value) => Canonical::Text(value.clone()),
            QueryValue::Timestamp(value) => Canonical::Time(self.pin(value)),
            QueryValue::List(items) => {
                Canonical::Seq(items.iter().map(|item| self.nested(item)).collect())
            }
            QueryValue::Set(items) => Canonical::Seq(self.sorted(items)),
            QueryValue::Map(entries) => Canonical::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), self.nested(value)))
                    .collect(),
            ),
            QueryValue::Opaque(value) => Canonical::Opaque(value.clone()),
        }
    }

    fn sorted(&self, items: &[QueryValue]) -> Vec<Canonical> {
        let mut canonical: Vec<Canonical> = items.iter().map(|item| self.nested(item)).collect();
        canonical.sort();
        canonical
    }

    fn pin(&self, timestamp: &OffsetDateTime) -> i64 {
        let secs = timestamp.unix_timestamp();
        secs - secs.rem_euclid(self.granularity_secs)
    }
}
