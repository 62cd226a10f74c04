//! An in-process [`Engine`] over a `BTreeMap`, grounded in the teacher's
//! `InMemoryStore` (`parking_lot::RwLock` guarding the shared state, a
//! `tokio::sync`-based wake-up for tailers). Used for unit tests, doctest
//! examples, and ephemeral deployments — never for anything that needs to
//! survive a process restart.

use std::collections::BTreeMap;
use std::ops::Bound as StdBound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard, Notify};

use factstore_core::{Bound, Engine, KeyRange, ReadTransaction, StoreError, WatchHandle, Watchable, WriteTransaction};
use factstore_core::types::FactPosition;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

pub struct MemoryEngine {
    state: RwLock<Map>,
    next_position: RwLock<u64>,
    /// Serializes write transactions: exactly one may be open at a time,
    /// held for its entire lifetime. This is what lets `reserve_position`
    /// hand out a position immediately and still be equivalent to
    /// resolving it at commit (§6) — no other transaction can interleave.
    writer_lock: Mutex<()>,
    notify: Arc<Notify>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BTreeMap::new()),
            next_position: RwLock::new(0),
            writer_lock: Mutex::new(()),
            notify: Arc::new(Notify::new()),
        }
    }
}

fn std_bound(bound: &Bound) -> StdBound<Vec<u8>> {
    match bound {
        Bound::Included(k) => StdBound::Included(k.clone()),
        Bound::Excluded(k) => StdBound::Excluded(k.clone()),
        Bound::Unbounded => StdBound::Unbounded,
    }
}

fn scan(map: &Map, range: &KeyRange) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range((std_bound(&range.start), std_bound(&range.end)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub struct MemoryReadTxn {
    snapshot: Map,
}

#[async_trait]
impl ReadTransaction for MemoryReadTxn {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.snapshot.get(key).cloned())
    }

    async fn get_range(
        &self,
        range: KeyRange,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut rows = scan(&self.snapshot, &range);
        if reverse {
            rows.reverse();
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

pub struct MemoryWriteTxn<'a> {
    engine: &'a MemoryEngine,
    _guard: MutexGuard<'a, ()>,
    base: Map,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    next_position: u64,
}

impl MemoryWriteTxn<'_> {
    fn overlaid(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.overlay.get(key) {
            Some(value) => value.clone(),
            None => self.base.get(key).cloned(),
        }
    }
}

#[async_trait]
impl ReadTransaction for MemoryWriteTxn<'_> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.overlaid(key))
    }

    async fn get_range(
        &self,
        range: KeyRange,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = scan(&self.base, &range)
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();
        let bounds = (std_bound(&range.start), std_bound(&range.end));
        for (k, v) in self.overlay.range(bounds) {
            merged.insert(k.clone(), v.clone());
        }
        let mut rows: Vec<(Vec<u8>, Vec<u8>)> = merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
        if reverse {
            rows.reverse();
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[async_trait]
impl WriteTransaction for MemoryWriteTxn<'_> {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert(key, Some(value));
    }

    fn clear_range(&mut self, start: Vec<u8>, end: Vec<u8>) {
        let bounds = (StdBound::Included(start), StdBound::Excluded(end));
        let keys: Vec<Vec<u8>> = self
            .base
            .range(bounds.clone())
            .map(|(k, _)| k.clone())
            .chain(self.overlay.range(bounds).map(|(k, _)| k.clone()))
            .collect();
        for key in keys {
            self.overlay.insert(key, None);
        }
    }

    fn reserve_position(&mut self) -> FactPosition {
        let position = FactPosition(self.next_position);
        self.next_position += 1;
        position
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.engine.state.write();
        for (key, value) in self.overlay {
            match value {
                Some(value) => {
                    state.insert(key, value);
                }
                None => {
                    state.remove(&key);
                }
            }
        }
        drop(state);
        *self.engine.next_position.write() = self.next_position;
        self.engine.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn begin_read(&self) -> Result<Box<dyn ReadTransaction + '_>, StoreError> {
        Ok(Box::new(MemoryReadTxn {
            snapshot: self.state.read().clone(),
        }))
    }

    async fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>, StoreError> {
        let guard = self.writer_lock.lock().await;
        let base = self.state.read().clone();
        let next_position = *self.next_position.read();
        Ok(Box::new(MemoryWriteTxn {
            engine: self,
            _guard: guard,
            base,
            overlay: BTreeMap::new(),
            next_position,
        }))
    }
}

struct MemoryWatchHandle {
    notify: Arc<Notify>,
}

#[async_trait]
impl WatchHandle for MemoryWatchHandle {
    async fn changed(self: Box<Self>) {
        self.notify.notified().await;
    }
}

/// Best-effort: a commit between this call returning and the caller
/// awaiting `changed()` is not guaranteed to be observed (`Notify`'s usual
/// caveat). `Streamer::stream_with_watch` races this against its poll
/// interval, so a missed notification costs at most one extra poll, never
/// correctness.
#[async_trait]
impl Watchable for MemoryEngine {
    async fn watch_tail(&self) -> Result<Box<dyn WatchHandle>, StoreError> {
        Ok(Box::new(MemoryWatchHandle {
            notify: self.notify.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_is_invisible_until_commit() {
        let engine = MemoryEngine::new();
        let mut txn = engine.begin_write().await.unwrap();
        txn.put(b"k".to_vec(), b"v".to_vec());

        let reader = engine.begin_read().await.unwrap();
        assert_eq!(reader.get(b"k").await.unwrap(), None);

        txn.commit().await.unwrap();
        let reader = engine.begin_read().await.unwrap();
        assert_eq!(reader.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn reserve_position_is_monotonic_across_commits() {
        let engine = MemoryEngine::new();
        let mut txn = engine.begin_write().await.unwrap();
        let p0 = txn.reserve_position();
        let p1 = txn.reserve_position();
        assert!(p1.0 > p0.0);
        txn.commit().await.unwrap();

        let mut txn2 = engine.begin_write().await.unwrap();
        let p2 = txn2.reserve_position();
        assert!(p2.0 > p1.0);
    }

    #[tokio::test]
    async fn clear_range_removes_base_and_overlay_entries() {
        let engine = MemoryEngine::new();
        let mut setup = engine.begin_write().await.unwrap();
        setup.put(b"a".to_vec(), b"1".to_vec());
        setup.commit().await.unwrap();

        let mut txn = engine.begin_write().await.unwrap();
        txn.put(b"b".to_vec(), b"2".to_vec());
        txn.clear_range(vec![], vec![0xFF, 0xFF]);
        txn.commit().await.unwrap();

        let reader = engine.begin_read().await.unwrap();
        assert_eq!(reader.get(b"a").await.unwrap(), None);
        assert_eq!(reader.get(b"b").await.unwrap(), None);
    }
}
