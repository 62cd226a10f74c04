//! Bounded, single-transaction reads (§4.5). Every method here materializes
//! its full result before returning — unlike [`crate::streamer::Streamer`],
//! which is open-ended and batches.

use tracing::instrument;

use crate::codec;
use crate::engine::{Engine, ReadTransaction};
use crate::errors::StoreError;
use crate::keyspace::KeySpace;
use crate::query::QueryEvaluator;
use crate::types::{Fact, FactId, FactPosition, Subject, TagQuery, Timestamp};

pub struct Finder<'a, E: Engine> {
    engine: &'a E,
    keyspace: &'a KeySpace,
}

impl<'a, E: Engine> Finder<'a, E> {
    pub fn new(engine: &'a E, keyspace: &'a KeySpace) -> Self {
        Self { engine, keyspace }
    }

    /// One `POSITIONS[factId]` read; if present, one `FACTS[position]` read.
    #[instrument(skip(self), fields(fact_id = %fact_id))]
    pub async fn find_by_id(&self, fact_id: FactId) -> Result<Option<Fact>, StoreError> {
        let txn = self.engine.begin_read().await?;
        self.find_by_id_in(txn.as_ref(), fact_id).await
    }

    async fn find_by_id_in(
        &self,
        txn: &dyn ReadTransaction,
        fact_id: FactId,
    ) -> Result<Option<Fact>, StoreError> {
        let Some(position) = self.resolve_position(txn, fact_id).await? else {
            return Ok(None);
        };
        self.load_fact(txn, position).await
    }

    /// Key existence on `POSITIONS[factId]`, no envelope read.
    pub async fn exists_by_id(&self, fact_id: FactId) -> Result<bool, StoreError> {
        let txn = self.engine.begin_read().await?;
        let key = self.keyspace.positions_key(fact_id.0);
        Ok(txn.get(&key).await?.is_some())
    }

    /// Range scan over `TIME_INDEX` with an inclusive lower and upper bound
    /// (the boundary policy chosen in DESIGN.md D-4). Secondary sort by
    /// position within a shared `(epochSec, nanos)`. `start > end` yields
    /// empty rather than handing a backwards range to an engine.
    pub async fn find_in_time_range(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Fact>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        let txn = self.engine.begin_read().await?;
        let range = self
            .keyspace
            .time_index_range((start.seconds, start.nanos), (end.seconds, end.nanos));
        let rows = txn.get_range(range, None, false).await?;
        let positions = rows
            .iter()
            .filter_map(|(k, _v)| self.keyspace.decode_position_from_index_key(k))
            .collect();
        self.load_facts_by_position(txn.as_ref(), positions).await
    }

    /// Range scan of `SUBJECT_INDEX[type, id, …]` in ascending position order.
    pub async fn find_by_subject(&self, subject: &Subject) -> Result<Vec<Fact>, StoreError> {
        let txn = self.engine.begin_read().await?;
        let range = self
            .keyspace
            .subject_index_range(&subject.subject_type, &subject.subject_id);
        let rows = txn.get_range(range, None, false).await?;
        let positions = rows
            .iter()
            .filter_map(|(k, _v)| self.keyspace.decode_position_from_index_key(k))
            .collect();
        self.load_facts_by_position(txn.as_ref(), positions).await
    }

    /// Subject-scoped count, without materializing envelopes.
    pub async fn count_by_subject(&self, subject: &Subject) -> Result<usize, StoreError> {
        let txn = self.engine.begin_read().await?;
        let range = self
            .keyspace
            .subject_index_range(&subject.subject_type, &subject.subject_id);
        Ok(txn.get_range(range, None, false).await?.len())
    }

    /// Union-of-tags (OR) over `TAG_INDEX`. Empty input returns empty
    /// without any engine reads. Results deduplicated and sorted by
    /// position.
    pub async fn find_by_tags(&self, tags: &[(String, String)]) -> Result<Vec<Fact>, StoreError> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.engine.begin_read().await?;
        let mut positions = std::collections::BTreeSet::new();
        for (k, v) in tags {
            let range = self.keyspace.tag_index_range(k, v, None);
            let rows = txn.get_range(range, None, false).await?;
            positions.extend(
                rows.iter()
                    .filter_map(|(k, _v)| self.keyspace.decode_position_from_index_key(k)),
            );
        }
        self.load_facts_by_position(txn.as_ref(), positions.into_iter().collect())
            .await
    }

    /// Delegates to [`QueryEvaluator`], then batch-loads envelopes. Results
    /// are sorted ascending by position (the natural commit order).
    pub async fn find_by_tag_query(&self, query: &TagQuery) -> Result<Vec<Fact>, StoreError> {
        let txn = self.engine.begin_read().await?;
        let evaluator = QueryEvaluator::new(self.keyspace);
        let positions = evaluator.evaluate(txn.as_ref(), query, None).await?;
        self.load_facts_by_position(txn.as_ref(), positions).await
    }

    /// Same scan as [`Self::find_by_tag_query`], count only.
    pub async fn count_by_tag_query(&self, query: &TagQuery) -> Result<usize, StoreError> {
        let txn = self.engine.begin_read().await?;
        let evaluator = QueryEvaluator::new(self.keyspace);
        Ok(evaluator.evaluate(txn.as_ref(), query, None).await?.len())
    }

    async fn resolve_position(
        &self,
        txn: &dyn ReadTransaction,
        fact_id: FactId,
    ) -> Result<Option<FactPosition>, StoreError> {
        let key = self.keyspace.positions_key(fact_id.0);
        match txn.get(&key).await? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Engine(anyhow::anyhow!("corrupt position value")))?;
                Ok(Some(FactPosition::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    async fn load_fact(
        &self,
        txn: &dyn ReadTransaction,
        position: FactPosition,
    ) -> Result<Option<Fact>, StoreError> {
        let key = self.keyspace.facts_key(position);
        match txn.get(&key).await? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Err(StoreError::Engine(anyhow::anyhow!(
                "position {position} indexed but missing from FACTS"
            ))),
        }
    }

    async fn load_facts_by_position(
        &self,
        txn: &dyn ReadTransaction,
        positions: Vec<FactPosition>,
    ) -> Result<Vec<Fact>, StoreError> {
        let mut facts = Vec::with_capacity(positions.len());
        for position in positions {
            if let Some(fact) = self.load_fact(txn, position).await? {
                facts.push(fact);
            }
        }
        Ok(facts)
    }
}
