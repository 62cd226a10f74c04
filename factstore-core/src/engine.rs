//! The engine contract consumed by the core (§6).
//!
//! This is the seam the teacher's `EventStore` trait occupied, generalized:
//! instead of one trait exposing domain operations directly, `Engine`
//! exposes only what an ordered, transactional key-value store must supply.
//! Every component above it (`Appender`, `QueryEvaluator`, `Finder`,
//! `Streamer`) is generic over `Engine` and never sees a backend-specific
//! type. No user code sees a raw engine future — every method here is
//! `async fn` behind `#[async_trait]`, the same boundary-adaptation the
//! teacher used for its own tonic/tokio seam.

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::types::FactPosition;

/// One bound of a key range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Included(Vec<u8>),
    Excluded(Vec<u8>),
    Unbounded,
}

/// A half-open (or fully bounded) byte-key range, as consumed by
/// [`ReadTransaction::get_range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound,
    pub end: Bound,
}

impl KeyRange {
    pub fn new(start: Bound, end: Bound) -> Self {
        Self { start, end }
    }
}

/// Read-only operations available both inside a read transaction and inside
/// a write transaction (every write transaction can also read its own
/// uncommitted writes plus the committed snapshot it started from).
#[async_trait]
pub trait ReadTransaction: Send {
    /// Point read. `None` if the key is absent.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Range read, ascending unless `reverse` is set, capped at `limit`
    /// entries when provided. Used both for bounded scans (`Finder`) and
    /// for existence-only checks (`QueryEvaluator` with `limit = Some(1)`).
    async fn get_range(
        &self,
        range: KeyRange,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// A transaction that can also write. Mutations are buffered until
/// [`WriteTransaction::commit`] and are invisible to any other transaction
/// until then.
#[async_trait]
pub trait WriteTransaction: ReadTransaction {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Clears every key in `[start, end)`. Used by `Store::reset`.
    fn clear_range(&mut self, start: Vec<u8>, end: Vec<u8>);

    /// Reserves the next store-wide monotonic position. This realizes the
    /// spec's "position placeholder resolved at commit": both backends hold
    /// their single writer lock for the whole transaction, so a position
    /// reserved here is observationally equivalent to one resolved at
    /// commit — no other transaction can interleave and observe a gap or a
    /// reuse. Calling this twice in one transaction returns two distinct,
    /// ascending positions (used when one request appends multiple facts).
    fn reserve_position(&mut self) -> FactPosition;

    /// Commits all buffered writes. Returns [`StoreError::Conflict`] if the
    /// engine detected an optimistic conflict with another transaction —
    /// callers must rerun the whole transaction body from scratch in that
    /// case (see [`crate::appender::Appender::append`]).
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// The engine contract: an ordered, transactional key-value store with
/// serializable isolation.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    async fn begin_read(&self) -> Result<Box<dyn ReadTransaction + '_>, StoreError>;
    async fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>, StoreError>;
}

/// An opaque handle returned by [`Watchable::watch_tail`]; awaiting it
/// resolves once the store's tail sentinel has changed since the watch was
/// registered.
#[async_trait]
pub trait WatchHandle: Send {
    async fn changed(self: Box<Self>);
}

/// Optional capability: change notification on the store's tail, so
/// [`crate::streamer::Streamer`] can wake on commit instead of polling. A
/// pure-polling engine is a conforming implementation that simply does not
/// implement this trait (§6, §9 Open Questions).
#[async_trait]
pub trait Watchable: Engine {
    async fn watch_tail(&self) -> Result<Box<dyn WatchHandle>, StoreError>;
}
