//! The façade a caller actually holds: one `Store` per logical store name,
//! composing [`Appender`], [`Finder`], and [`Streamer`] over a shared engine
//! handle and a precomputed [`KeySpace`] (§5.7).
//!
//! `Store` itself carries no mutable state beyond the engine handle and the
//! keyspace, both immutable after construction (§5 "Shared resource
//! policy") — cloning a `Store` is cheap and every clone is a view onto the
//! same logical store.

use std::sync::Arc;

use crate::appender::Appender;
use crate::engine::Engine;
use crate::errors::StoreError;
use crate::finder::Finder;
use crate::keyspace::KeySpace;
use crate::streamer::Streamer;
use crate::types::{AppendCondition, AppendRequest, AppendResult, Fact, FactId, IdempotencyKey};

#[derive(Clone)]
pub struct Store<E: Engine> {
    engine: Arc<E>,
    keyspace: KeySpace,
}

impl<E: Engine> Store<E> {
    /// Opens a store named `store_name` over an already-constructed engine
    /// handle. Backend crates wrap this with their own free functions
    /// (`factstore_backend_memory::open`, `factstore_backend_redb::open`)
    /// rather than inherent constructors on `Store` itself, since only this
    /// crate may add inherent impls to `Store` (§5.7).
    pub fn new(engine: Arc<E>, store_name: &str) -> Self {
        Self {
            engine,
            keyspace: KeySpace::new(store_name),
        }
    }

    fn appender(&self) -> Appender<'_, E> {
        Appender::new(&self.engine, &self.keyspace)
    }

    fn finder(&self) -> Finder<'_, E> {
        Finder::new(&self.engine, &self.keyspace)
    }

    pub fn streamer(&self) -> Streamer<E> {
        Streamer::new(self.engine.clone(), self.keyspace.clone())
    }

    pub async fn append_fact(&self, fact: Fact) -> Result<AppendResult, StoreError> {
        self.appender().append_fact(fact).await
    }

    pub async fn append_facts(&self, facts: Vec<Fact>) -> Result<AppendResult, StoreError> {
        self.appender().append_facts(facts).await
    }

    pub async fn append(
        &self,
        facts: Vec<Fact>,
        idempotency_key: IdempotencyKey,
        condition: AppendCondition,
    ) -> Result<AppendResult, StoreError> {
        let request = AppendRequest::new(facts, idempotency_key, condition)?;
        self.appender().append(request).await
    }

    pub async fn find_by_id(&self, fact_id: FactId) -> Result<Option<Fact>, StoreError> {
        self.finder().find_by_id(fact_id).await
    }

    pub async fn exists_by_id(&self, fact_id: FactId) -> Result<bool, StoreError> {
        self.finder().exists_by_id(fact_id).await
    }

    pub async fn find_in_time_range(
        &self,
        start: crate::types::Timestamp,
        end: crate::types::Timestamp,
    ) -> Result<Vec<Fact>, StoreError> {
        self.finder().find_in_time_range(start, end).await
    }

    pub async fn find_by_subject(
        &self,
        subject: &crate::types::Subject,
    ) -> Result<Vec<Fact>, StoreError> {
        self.finder().find_by_subject(subject).await
    }

    pub async fn find_by_tags(
        &self,
        tags: &[(String, String)],
    ) -> Result<Vec<Fact>, StoreError> {
        self.finder().find_by_tags(tags).await
    }

    pub async fn find_by_tag_query(
        &self,
        query: &crate::types::TagQuery,
    ) -> Result<Vec<Fact>, StoreError> {
        self.finder().find_by_tag_query(query).await
    }

    /// Clears every key under this store's prefix in one transaction.
    /// Test-only by convention — not feature-gated, matching the teacher's
    /// own undecorated test-support code (§5.8).
    pub async fn reset(&self) -> Result<(), StoreError> {
        let mut txn = self.engine.begin_write().await?;
        let (start, end) = self.keyspace.whole_store_range();
        txn.clear_range(start, end);
        txn.commit().await
    }
}
