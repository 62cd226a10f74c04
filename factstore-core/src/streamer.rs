//! Long-running tailer over the global position index (§4.6): a resumable
//! cursor, bounded batching, and a poll-or-watch wake-up when the batch runs
//! dry.
//!
//! The returned stream is lazy, infinite, cold, and restartable: nothing
//! runs until the caller polls it, and dropping it stops all further I/O —
//! this is why the loop body lives inside [`async_stream::try_stream!`]
//! rather than a spawned background task, which would start working before
//! anyone asked for an item.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use tokio_stream::Stream;

use crate::codec;
use crate::engine::{Engine, Watchable};
use crate::errors::StoreError;
use crate::keyspace::KeySpace;
use crate::types::{Fact, FactPosition, StartPosition};

/// Default per-batch row cap (§4.6 names the range 1024-5000; this crate
/// picks the low end as the default, tunable via [`Streamer::with_batch_size`]).
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Default sleep between empty-batch polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub type FactStream = Pin<Box<dyn Stream<Item = Result<Fact, StoreError>> + Send>>;

pub struct Streamer<E: Engine> {
    engine: Arc<E>,
    keyspace: KeySpace,
    batch_size: usize,
    poll_interval: Duration,
}

impl<E: Engine> Streamer<E> {
    pub fn new(engine: Arc<E>, keyspace: KeySpace) -> Self {
        Self {
            engine,
            keyspace,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Pure-polling tail, available for any `Engine`. Resolves the initial
    /// cursor eagerly — an unknown `After(factId)` surfaces
    /// `InvalidStreamingCursor` before the stream is returned, matching
    /// §7's propagation policy ("Streamer surfaces InvalidStreamingCursor at
    /// start, then only engine errors thereafter").
    pub async fn stream(&self, start: StartPosition) -> Result<FactStream, StoreError> {
        let cursor = self.resolve_start(start).await?;
        let engine = self.engine.clone();
        let keyspace = self.keyspace.clone();
        let batch_size = self.batch_size;
        let poll_interval = self.poll_interval;

        Ok(Box::pin(try_stream! {
            let mut cursor = cursor;
            loop {
                let rows = {
                    let range = keyspace.facts_range_after(cursor);
                    let txn = engine.begin_read().await?;
                    txn.get_range(range, Some(batch_size), false).await?
                };
                if rows.is_empty() {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
                for (key, value) in rows {
                    let position = keyspace.decode_position_from_facts_key(&key).ok_or_else(|| {
                        StoreError::Engine(anyhow::anyhow!("malformed FACTS key in range scan"))
                    })?;
                    let fact = codec::decode(&value)?;
                    yield fact;
                    cursor = Some(position);
                }
            }
        }))
    }

    async fn resolve_start(
        &self,
        start: StartPosition,
    ) -> Result<Option<FactPosition>, StoreError> {
        match start {
            StartPosition::Beginning => Ok(None),
            StartPosition::End => {
                let txn = self.engine.begin_read().await?;
                let range = self.keyspace.facts_range_after(None);
                let rows = txn.get_range(range, Some(1), true).await?;
                Ok(rows
                    .first()
                    .and_then(|(key, _)| self.keyspace.decode_position_from_facts_key(key)))
            }
            StartPosition::After(fact_id) => {
                let txn = self.engine.begin_read().await?;
                let key = self.keyspace.positions_key(fact_id.0);
                match txn.get(&key).await? {
                    Some(bytes) => {
                        let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                            StoreError::Engine(anyhow::anyhow!("corrupt position value"))
                        })?;
                        Ok(Some(FactPosition::from_be_bytes(arr)))
                    }
                    None => Err(StoreError::InvalidStreamingCursor(fact_id)),
                }
            }
        }
    }
}

/// Watch-aware tail, available only when the backend implements
/// [`Watchable`]. Identical loop to [`Streamer::stream`], except an empty
/// batch races the poll-interval timer against a wake-up on the store's
/// tail sentinel (§5.6 / §9 Open Question — a pure-polling engine is an
/// equally conforming implementer of the base `stream`, recorded as
/// DESIGN.md decision D-2). Kept as a separate method rather than an
/// override of `stream` because Rust's inherent-impl resolution cannot
/// pick between two same-named methods once a type satisfies both bounds.
impl<E: Watchable> Streamer<E> {
    pub async fn stream_with_watch(&self, start: StartPosition) -> Result<FactStream, StoreError> {
        let cursor = self.resolve_start(start).await?;
        let engine = self.engine.clone();
        let keyspace = self.keyspace.clone();
        let batch_size = self.batch_size;
        let poll_interval = self.poll_interval;

        Ok(Box::pin(try_stream! {
            let mut cursor = cursor;
            loop {
                let rows = {
                    let range = keyspace.facts_range_after(cursor);
                    let txn = engine.begin_read().await?;
                    txn.get_range(range, Some(batch_size), false).await?
                };
                if rows.is_empty() {
                    let watch = engine.watch_tail().await?;
                    tokio::select! {
                        _ = watch.changed() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                    continue;
                }
                for (key, value) in rows {
                    let position = keyspace.decode_position_from_facts_key(&key).ok_or_else(|| {
                        StoreError::Engine(anyhow::anyhow!("malformed FACTS key in range scan"))
                    })?;
                    let fact = codec::decode(&value)?;
                    yield fact;
                    cursor = Some(position);
                }
            }
        }))
    }
}
