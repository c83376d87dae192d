//! Cached result sets and their wire encoding.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::CacheError;
use super::keys::RecordId;

/// Record ids produced by a search, optionally scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum ResultSet {
    Ids(BTreeSet<RecordId>),
    Scored(BTreeMap<RecordId, f64>),
}

impl Default for ResultSet {
    fn default() -> Self {
        Self::Ids(BTreeSet::new())
    }
}

impl FromIterator<RecordId> for ResultSet {
    fn from_iter<I: IntoIterator<Item = RecordId>>(iter: I) -> Self {
        Self::Ids(iter.into_iter().collect())
    }
}

/// One row of a score-ranked result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedRow {
    pub id: RecordId,
    pub score: f64,
    /// Score relative to the best row, as a percentage.
    pub normalized: u32,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        match self {
            ResultSet::Ids(ids) => ids.len(),
            ResultSet::Scored(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: RecordId) -> bool {
        match self {
            ResultSet::Ids(ids) => ids.contains(&id),
            ResultSet::Scored(rows) => rows.contains_key(&id),
        }
    }

    /// Member ids in ascending order.
    pub fn ids(&self) -> Vec<RecordId> {
        match self {
            ResultSet::Ids(ids) => ids.iter().copied().collect(),
            ResultSet::Scored(rows) => rows.keys().copied().collect(),
        }
    }

    /// Score of `id`; unscored members count as 1.
    pub fn score(&self, id: RecordId) -> Option<f64> {
        match self {
            ResultSet::Ids(ids) => ids.contains(&id).then_some(1.0),
            ResultSet::Scored(rows) => rows.get(&id).copied(),
        }
    }

    /// Intersect with `other`, combining weighted scores.
    ///
    /// Two unscored sets stay unscored. Otherwise each surviving id scores
    /// `self_weight * self_score + other_weight * other_score`.
    pub fn intersect(&self, self_weight: u32, other: &ResultSet, other_weight: u32) -> ResultSet {
        match (self, other) {
            (ResultSet::Ids(left), ResultSet::Ids(right)) => {
                ResultSet::Ids(left.intersection(right).copied().collect())
            }
            _ => {
                let rows = self
                    .ids()
                    .into_iter()
                    .filter_map(|id| {
                        let left = self.score(id)?;
                        let right = other.score(id)?;
                        Some((
                            id,
                            f64::from(self_weight) * left + f64::from(other_weight) * right,
                        ))
                    })
                    .collect();
                ResultSet::Scored(rows)
            }
        }
    }

    /// Rows ordered by descending score with scores normalized to the best.
    ///
    /// Unscored sets rank every row at 1 in id order.
    pub fn ranked(&self) -> Vec<RankedRow> {
        match self {
            ResultSet::Ids(ids) => ids
                .iter()
                .map(|id| RankedRow {
                    id: *id,
                    score: 1.0,
                    normalized: 1,
                })
                .collect(),
            ResultSet::Scored(rows) => {
                let mut ordered: Vec<(RecordId, f64)> =
                    rows.iter().map(|(id, score)| (*id, *score)).collect();
                ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
                let max = ordered.first().map(|(_, score)| *score).unwrap_or(1.0);
                ordered
                    .into_iter()
                    .map(|(id, score)| RankedRow {
                        id,
                        score,
                        normalized: normalize(score, max),
                    })
                    .collect()
            }
        }
    }

    pub(crate) fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub(crate) fn decode(key: &str, raw: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(raw).map_err(|err| CacheError::malformed(key, err.to_string()))
    }
}

fn normalize(score: f64, max: f64) -> u32 {
    if max <= 0.0 {
        return 0;
    }
    (100.0 * score / max).clamp(0.0, 100.0) as u32
}

/// Outcome of evaluating a query against the field indexes.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Every index declined; the query filters nothing. Never cached.
    Everything,
    /// At least one index answered. May be empty.
    Matched(ResultSet),
}

impl QueryResult {
    pub fn matched(&self) -> Option<&ResultSet> {
        match self {
            QueryResult::Everything => None,
            QueryResult::Matched(rows) => Some(rows),
        }
    }
}

/// Back-reference list stored under a record or field key.
pub(crate) fn encode_back_references(keys: &BTreeSet<String>) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(keys).map(Bytes::from)
}

pub(crate) fn decode_back_references(key: &str, raw: &[u8]) -> Result<Vec<String>, CacheError> {
    serde_json::from_slice(raw).map_err(|err| CacheError::malformed(key, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> ResultSet {
        values.iter().copied().map(RecordId).collect()
    }

    fn scored(values: &[(u64, f64)]) -> ResultSet {
        ResultSet::Scored(
            values
                .iter()
                .map(|(id, score)| (RecordId(*id), *score))
                .collect(),
        )
    }

    #[test]
    fn unscored_intersection_stays_unscored() {
        let merged = ids(&[1, 2, 3]).intersect(1, &ids(&[2, 3, 4]), 1);
        assert_eq!(merged, ids(&[2, 3]));
    }

    #[test]
    fn scored_intersection_sums_weighted_scores() {
        let merged = scored(&[(1, 2.0), (2, 5.0)]).intersect(1, &ids(&[2, 3]), 1);
        assert_eq!(merged, scored(&[(2, 6.0)]));

        let weighted = ids(&[2, 3]).intersect(2, &scored(&[(2, 4.0)]), 1);
        assert_eq!(weighted, scored(&[(2, 6.0)]));
    }

    #[test]
    fn empty_intersection_is_empty_not_absent() {
        let merged = ids(&[1]).intersect(1, &ids(&[2]), 1);
        assert!(merged.is_empty());
        assert!(matches!(merged, ResultSet::Ids(_)));
    }

    #[test]
    fn ranked_orders_by_score_and_normalizes() {
        let rows = scored(&[(1, 2.0), (2, 8.0), (3, 4.0)]).ranked();
        let order: Vec<u64> = rows.iter().map(|row| row.id.0).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(rows[0].normalized, 100);
        assert_eq!(rows[1].normalized, 50);
        assert_eq!(rows[2].normalized, 25);
    }

    #[test]
    fn encoded_scored_set_decodes() {
        let original = scored(&[(7, 1.5), (9, 3.0)]);
        let raw = original.encode().unwrap();
        assert_eq!(ResultSet::decode("k", &raw).unwrap(), original);
    }

    #[test]
    fn foreign_shapes_are_malformed() {
        let err = ResultSet::decode("q:abc", br#"["q:abc"]"#).unwrap_err();
        assert!(matches!(err, CacheError::MalformedCachedValue { .. }));

        let err = decode_back_references("r:1", br#"{"kind":"ids","rows":[1]}"#).unwrap_err();
        assert!(matches!(err, CacheError::MalformedCachedValue { .. }));
    }
}
