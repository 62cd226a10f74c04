//! Single entry point for writes (§4.3): validates uniqueness, enforces
//! idempotency, evaluates the append condition, and writes the fact plus
//! all indexes atomically.

use tracing::{info, instrument, warn};

use crate::engine::{Engine, WriteTransaction};
use crate::errors::StoreError;
use crate::keyspace::{encode_fact_id_value, KeySpace};
use crate::query::QueryEvaluator;
use crate::types::{
    AppendCondition, AppendRequest, AppendResult, Fact, FactId, FactPosition, IdempotencyKey,
};

pub struct Appender<'a, E: Engine> {
    engine: &'a E,
    keyspace: &'a KeySpace,
}

/// What the per-attempt body decided to do with the transaction it was
/// handed. `Abort` carries the value-level outcome to report (the
/// transaction is dropped, not committed, which rolls it back).
enum Outcome {
    Commit(Vec<FactPosition>),
    Abort(AppendResult),
}

impl<'a, E: Engine> Appender<'a, E> {
    pub fn new(engine: &'a E, keyspace: &'a KeySpace) -> Self {
        Self { engine, keyspace }
    }

    /// `append(fact)` convenience wrapper: fresh idempotency key, no
    /// precondition.
    pub async fn append_fact(&self, fact: Fact) -> Result<AppendResult, StoreError> {
        self.append_facts(vec![fact]).await
    }

    /// `append([fact...])` convenience wrapper.
    pub async fn append_facts(&self, facts: Vec<Fact>) -> Result<AppendResult, StoreError> {
        let request = AppendRequest::new(facts, IdempotencyKey::fresh(), AppendCondition::None)?;
        self.append(request).await
    }

    /// `append(request)` — the full transaction protocol (§4.3). A
    /// transient engine conflict reruns the whole closure from step 1; the
    /// caller only ever sees the final outcome.
    #[instrument(skip(self, request), fields(
        fact_count = request.facts.len(),
        idempotency_key = %request.idempotency_key,
    ))]
    pub async fn append(&self, request: AppendRequest) -> Result<AppendResult, StoreError> {
        loop {
            let mut txn = self.engine.begin_write().await?;
            let outcome = self.try_append(txn.as_mut(), &request).await?;
            match outcome {
                Outcome::Commit(positions) => match txn.commit().await {
                    Ok(()) => {
                        info!(fact_count = positions.len(), "appended");
                        return Ok(AppendResult::Appended { positions });
                    }
                    Err(StoreError::Conflict) => continue,
                    Err(e) => return Err(e),
                },
                Outcome::Abort(result) => {
                    drop(txn);
                    warn!(?result, "append aborted without writing");
                    return Ok(result);
                }
            }
        }
    }

    async fn try_append(
        &self,
        txn: &mut dyn WriteTransaction,
        request: &AppendRequest,
    ) -> Result<Outcome, StoreError> {
        // Step 1: idempotency gate.
        let idem_key = self.keyspace.idempotency_key(request.idempotency_key.0);
        if txn.get(&idem_key).await?.is_some() {
            return Ok(Outcome::Abort(AppendResult::AlreadyApplied));
        }

        // Step 2: uniqueness check — every fact id, colliding or not.
        let mut dupes = Vec::new();
        for fact in &request.facts {
            let positions_key = self.keyspace.positions_key(fact.id.0);
            if txn.get(&positions_key).await?.is_some() {
                dupes.push(fact.id);
            }
        }
        if !dupes.is_empty() {
            return Err(StoreError::DuplicateFactId(dupes));
        }

        // Step 3: condition evaluation.
        if let Some(reason) = self.check_condition(txn, &request.condition).await? {
            return Ok(Outcome::Abort(AppendResult::AppendConditionViolated {
                reason,
            }));
        }

        // Step 4: writes. Relative order of facts in the request is
        // preserved in every index because positions are reserved in
        // request order and are strictly increasing.
        let mut positions = Vec::with_capacity(request.facts.len());
        for fact in &request.facts {
            let position = txn.reserve_position();
            txn.put(self.keyspace.facts_key(position), crate::codec::encode(fact)?);
            txn.put(
                self.keyspace.positions_key(fact.id.0),
                position.to_be_bytes().to_vec(),
            );
            let value = encode_fact_id_value(fact.id.0);
            for key in self.keyspace.index_rows(fact, position) {
                txn.put(key, value.clone());
            }
            positions.push(position);
        }

        // Step 5: record the idempotency key.
        txn.put(idem_key, Vec::new());

        Ok(Outcome::Commit(positions))
    }

    /// Returns `Some(reason)` if the condition is violated (abort without
    /// writing), `None` if it holds.
    async fn check_condition(
        &self,
        txn: &dyn WriteTransaction,
        condition: &AppendCondition,
    ) -> Result<Option<String>, StoreError> {
        match condition {
            AppendCondition::None => Ok(None),
            AppendCondition::ExpectedLastFact {
                subject,
                expected_last_id,
            } => self
                .check_expected_last_fact(txn, subject, *expected_last_id)
                .await
                .map(|ok| (!ok).then(|| format!("expected last fact mismatch for {subject:?}"))),
            AppendCondition::ExpectedMultiSubjectLastFact { expectations } => {
                for (subject, expected) in expectations {
                    let ok = self.check_expected_last_fact(txn, subject, *expected).await?;
                    if !ok {
                        return Ok(Some(format!(
                            "expected last fact mismatch for {subject:?}"
                        )));
                    }
                }
                Ok(None)
            }
            AppendCondition::TagQueryBased {
                fail_if_events_match,
                after,
            } => {
                let after_position = match after {
                    Some(fact_id) => Some(self.resolve_position(txn, *fact_id).await?),
                    None => None,
                };
                let evaluator = QueryEvaluator::new(self.keyspace);
                if evaluator
                    .exists(txn, fail_if_events_match, after_position)
                    .await?
                {
                    Ok(Some("failIfEventsMatch query matched an existing fact".into()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn resolve_position(
        &self,
        txn: &dyn WriteTransaction,
        fact_id: FactId,
    ) -> Result<FactPosition, StoreError> {
        let key = self.keyspace.positions_key(fact_id.0);
        match txn.get(&key).await? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Engine(anyhow::anyhow!("corrupt position value")))?;
                Ok(FactPosition::from_be_bytes(arr))
            }
            None => Err(StoreError::InvalidStreamingCursor(fact_id)),
        }
    }

    /// `subject`'s latest fact id must equal `expected`. `None` means "no
    /// prior fact for this subject", which requires the subject's index
    /// range to be empty.
    async fn check_expected_last_fact(
        &self,
        txn: &dyn WriteTransaction,
        subject: &crate::types::Subject,
        expected: Option<FactId>,
    ) -> Result<bool, StoreError> {
        let range = self
            .keyspace
            .subject_index_range(&subject.subject_type, &subject.subject_id);
        let rows = txn.get_range(range, None, true).await?;
        let actual = rows
            .first()
            .and_then(|(_k, v)| crate::keyspace::decode_fact_id_value(v))
            .map(FactId);
        Ok(actual == expected)
    }
}
