//! Resolves a [`TagQuery`] into an ordered set of [`FactPosition`]s using
//! the tag/type indexes (§4.4). Shared between [`crate::finder::Finder`]
//! (`findByTagQuery`, unrestricted) and [`crate::appender::Appender`]
//! (`AppendCondition::TagQueryBased`, existence-only).

use std::collections::BTreeSet;

use crate::engine::ReadTransaction;
use crate::errors::StoreError;
use crate::keyspace::KeySpace;
use crate::types::{FactPosition, TagQuery, TagQueryItem};

pub struct QueryEvaluator<'a> {
    keyspace: &'a KeySpace,
}

impl<'a> QueryEvaluator<'a> {
    pub fn new(keyspace: &'a KeySpace) -> Self {
        Self { keyspace }
    }

    /// Unrestricted evaluation: every matching position, ascending, no cap.
    /// Used by `Finder::find_by_tag_query`.
    pub async fn evaluate(
        &self,
        txn: &dyn ReadTransaction,
        query: &TagQuery,
        after: Option<FactPosition>,
    ) -> Result<Vec<FactPosition>, StoreError> {
        let mut union = BTreeSet::new();
        for item in &query.items {
            union.extend(self.evaluate_item_full(txn, item, after).await?);
        }
        Ok(union.into_iter().collect())
    }

    async fn evaluate_item_full(
        &self,
        txn: &dyn ReadTransaction,
        item: &TagQueryItem,
        after: Option<FactPosition>,
    ) -> Result<BTreeSet<FactPosition>, StoreError> {
        match item {
            TagQueryItem::TagType { types, tags } => {
                let mut union = BTreeSet::new();
                for fact_type in types {
                    let mut intersection: Option<BTreeSet<FactPosition>> = None;
                    for (k, v) in tags {
                        let range = self.keyspace.type_tag_index_range(fact_type, k, v, after);
                        let rows = txn.get_range(range, None, false).await?;
                        let positions: BTreeSet<FactPosition> = rows
                            .iter()
                            .filter_map(|(k, _v)| self.keyspace.decode_position_from_index_key(k))
                            .collect();
                        intersection = Some(match intersection {
                            None => positions,
                            Some(acc) => acc.intersection(&positions).copied().collect(),
                        });
                    }
                    union.extend(intersection.unwrap_or_default());
                }
                Ok(union)
            }
            TagQueryItem::TagOnly { tags } => {
                let mut union = BTreeSet::new();
                for (k, v) in tags {
                    let range = self.keyspace.tag_index_range(k, v, after);
                    let rows = txn.get_range(range, None, false).await?;
                    union.extend(
                        rows.iter()
                            .filter_map(|(k, _v)| self.keyspace.decode_position_from_index_key(k)),
                    );
                }
                Ok(union)
            }
        }
    }

    /// Existence-only evaluation for `AppendCondition::TagQueryBased`: does
    /// at least one matching fact exist strictly after `after`?
    ///
    /// Every individual engine range call here is capped at `limit = 1`
    /// (§4.4): for a `TagOnlyQueryItem` the tags are already OR'd, so the
    /// first non-empty single-row lookup settles it. For a `TagTypeItem`
    /// the tags are AND'd, which a single limit-1 lookup per tag cannot
    /// decide on its own (different tags could return different positions);
    /// instead the first listed tag is used as the anchor and walked one
    /// candidate at a time (`limit = 1`, advancing `after` past each
    /// rejected candidate), verifying each candidate against the remaining
    /// tags with direct point reads. Worst case this touches exactly the
    /// anchor tag's match count, matching §5's bound ("the smallest tag's
    /// match count plus the batch for limited evaluations") when the first
    /// tag happens to be the most selective one — recorded as DESIGN.md
    /// decision D-5.
    pub async fn exists(
        &self,
        txn: &dyn ReadTransaction,
        query: &TagQuery,
        after: Option<FactPosition>,
    ) -> Result<bool, StoreError> {
        for item in &query.items {
            if self.item_exists(txn, item, after).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn item_exists(
        &self,
        txn: &dyn ReadTransaction,
        item: &TagQueryItem,
        after: Option<FactPosition>,
    ) -> Result<bool, StoreError> {
        match item {
            TagQueryItem::TagOnly { tags } => {
                for (k, v) in tags {
                    let range = self.keyspace.tag_index_range(k, v, after);
                    let rows = txn.get_range(range, Some(1), false).await?;
                    if !rows.is_empty() {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TagQueryItem::TagType { types, tags } => {
                for fact_type in types {
                    let (anchor_key, anchor_value) = &tags[0];
                    let remaining = &tags[1..];
                    let mut cursor = after;
                    loop {
                        let range = self.keyspace.type_tag_index_range(
                            fact_type,
                            anchor_key,
                            anchor_value,
                            cursor,
                        );
                        let rows = txn.get_range(range, Some(1), false).await?;
                        let Some((key, _value)) = rows.into_iter().next() else {
                            break;
                        };
                        let Some(candidate) =
                            self.keyspace.decode_position_from_index_key(&key)
                        else {
                            break;
                        };
                        let mut all_match = true;
                        for (k, v) in remaining {
                            let probe = self.keyspace.type_tag_index_key(fact_type, k, v, candidate);
                            if txn.get(&probe).await?.is_none() {
                                all_match = false;
                                break;
                            }
                        }
                        if all_match {
                            return Ok(true);
                        }
                        cursor = Some(candidate);
                    }
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_type_item_requires_nonempty_types_and_tags() {
        assert!(TagQueryItem::tag_type(vec![], vec![("a".into(), "b".into())]).is_err());
        assert!(TagQueryItem::tag_type(vec!["T".into()], vec![]).is_err());
        assert!(TagQueryItem::tag_type(vec!["T".into()], vec![("a".into(), "b".into())]).is_ok());
    }

    #[test]
    fn tag_only_item_requires_nonempty_tags() {
        assert!(TagQueryItem::tag_only(vec![]).is_err());
        assert!(TagQueryItem::tag_only(vec![("a".into(), "b".into())]).is_ok());
    }

    #[test]
    fn tag_query_requires_nonempty_items() {
        assert!(TagQuery::new(vec![]).is_err());
    }
}
