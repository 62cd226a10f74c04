//! A persistent [`Engine`] over `redb`, grounded in the teacher's
//! `PostgresStore` slot in the backend lineup but built from scratch against
//! an embedded ordered key-value engine instead of a client-server one —
//! `redb`'s single-file, mmap-backed table is the closer analogue to the
//! abstract "ordered transactional key-value store" the core asks for (§6),
//! and needs no server to stand up in tests or at the edge.
//!
//! `redb`'s API is synchronous; every table operation here runs inside
//! [`tokio::task::spawn_blocking`] so it never parks the async runtime on
//! disk or mmap I/O. Does not implement [`Watchable`] — `redb` has no
//! change-notification primitive, so [`crate::RedbEngine`] is a conforming
//! poll-only engine (§6 Open Questions).

use std::collections::BTreeMap;
use std::ops::Bound as StdBound;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tokio::sync::{Mutex, MutexGuard};

use factstore_core::engine::{Bound, Engine, KeyRange, ReadTransaction, WriteTransaction};
use factstore_core::errors::StoreError;
use factstore_core::types::FactPosition;

const DATA_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("factstore_data");
const COUNTER_TABLE: TableDefinition<u64, u64> = TableDefinition::new("factstore_counter");
const COUNTER_KEY: u64 = 0;

fn engine_err<E: std::error::Error + Send + Sync + 'static>(err: E) -> StoreError {
    StoreError::Engine(anyhow::Error::new(err))
}

fn join_err(err: tokio::task::JoinError) -> StoreError {
    StoreError::Engine(anyhow::anyhow!("blocking redb task panicked: {err}"))
}

fn bound_ref(bound: &Bound) -> StdBound<&[u8]> {
    match bound {
        Bound::Included(k) => StdBound::Included(k.as_slice()),
        Bound::Excluded(k) => StdBound::Excluded(k.as_slice()),
        Bound::Unbounded => StdBound::Unbounded,
    }
}

fn bound_owned(bound: &Bound) -> StdBound<Vec<u8>> {
    match bound {
        Bound::Included(k) => StdBound::Included(k.clone()),
        Bound::Excluded(k) => StdBound::Excluded(k.clone()),
        Bound::Unbounded => StdBound::Unbounded,
    }
}

fn key_in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    key >= start && key < end
}

fn is_cleared(cleared_ranges: &[(Vec<u8>, Vec<u8>)], key: &[u8]) -> bool {
    cleared_ranges
        .iter()
        .any(|(start, end)| key_in_range(key, start, end))
}

/// Opens a lazy, direction-aware iterator over `table`'s rows in `range`.
/// `redb::Range` is a cursor, not a materialized `Vec`, so nothing beyond
/// what the caller actually consumes is ever read off the table.
fn table_iter<'a>(
    table: &'a impl ReadableTable<&'static [u8], &'static [u8]>,
    range: &KeyRange,
    reverse: bool,
) -> Result<Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), StoreError>> + 'a>, StoreError> {
    let bounds = (bound_ref(&range.start), bound_ref(&range.end));
    let cursor = table.range::<&[u8]>(bounds).map_err(engine_err)?;
    let decode = |entry: Result<_, redb::StorageError>| {
        let (k, v) = entry.map_err(engine_err)?;
        Ok((k.value().to_vec(), v.value().to_vec()))
    };
    if reverse {
        Ok(Box::new(cursor.rev().map(decode)))
    } else {
        Ok(Box::new(cursor.map(decode)))
    }
}

/// Scans `table` for rows in `range`, ascending unless `reverse`, stopping
/// as soon as `limit` rows have been read off the underlying cursor — the
/// bound is applied to the redb iteration itself, not to an already fully
/// materialized `Vec`.
fn scan_table(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    range: &KeyRange,
    limit: Option<usize>,
    reverse: bool,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    let mut rows = Vec::new();
    for entry in table_iter(table, range, reverse)? {
        rows.push(entry?);
        if limit.is_some_and(|limit| rows.len() >= limit) {
            break;
        }
    }
    Ok(rows)
}

/// Merges a lazy base-table scan with this transaction's buffered overlay,
/// walking both in the scan's direction and stopping as soon as `limit`
/// rows have been produced. `overlay_window` must already be sorted in the
/// same direction `base_iter` yields keys in (ascending, or descending when
/// `reverse`); `cleared_ranges` tombstones base rows a buffered
/// `clear_range` hasn't resolved into individual overlay entries yet.
///
/// This is what lets a bounded write-transaction scan — most importantly
/// `QueryEvaluator::exists`'s `limit = 1` lookups — avoid reading more of
/// the underlying table than it needs to, the same guarantee
/// `scan_table` gives a plain read transaction.
fn merge_bounded(
    mut base_iter: std::iter::Peekable<
        Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), StoreError>> + '_>,
    >,
    overlay_window: &[(Vec<u8>, Option<Vec<u8>>)],
    cleared_ranges: &[(Vec<u8>, Vec<u8>)],
    reverse: bool,
    limit: Option<usize>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    let mut rows = Vec::new();
    let mut overlay_idx = 0;

    loop {
        if limit.is_some_and(|limit| rows.len() >= limit) {
            break;
        }
        if matches!(base_iter.peek(), Some(Err(_))) {
            return Err(base_iter.next().unwrap().unwrap_err());
        }
        let base_key: Option<Vec<u8>> = base_iter.peek().map(|r| r.as_ref().unwrap().0.clone());
        let overlay_entry = overlay_window.get(overlay_idx);

        match (base_key, overlay_entry) {
            (None, None) => break,
            (Some(_), None) => {
                let (k, v) = base_iter.next().unwrap()?;
                if !is_cleared(cleared_ranges, &k) {
                    rows.push((k, v));
                }
            }
            (None, Some((ok, ov))) => {
                if let Some(v) = ov {
                    rows.push((ok.clone(), v.clone()));
                }
                overlay_idx += 1;
            }
            (Some(bk), Some((ok, ov))) => {
                let ordering = if reverse { ok.cmp(&bk) } else { bk.cmp(ok) };
                match ordering {
                    std::cmp::Ordering::Less => {
                        let (k, v) = base_iter.next().unwrap()?;
                        if !is_cleared(cleared_ranges, &k) {
                            rows.push((k, v));
                        }
                    }
                    std::cmp::Ordering::Greater => {
                        if let Some(v) = ov {
                            rows.push((ok.clone(), v.clone()));
                        }
                        overlay_idx += 1;
                    }
                    std::cmp::Ordering::Equal => {
                        base_iter.next().unwrap()?;
                        if let Some(v) = ov {
                            rows.push((ok.clone(), v.clone()));
                        }
                        overlay_idx += 1;
                    }
                }
            }
        }
    }
    Ok(rows)
}

pub struct RedbEngine {
    db: Arc<Database>,
    writer_lock: Mutex<()>,
}

impl RedbEngine {
    /// Opens (creating if absent) a `redb` database file at `path` and
    /// ensures the two tables this backend needs exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(engine_err)?;
        Self::from_database(db)
    }

    /// An ephemeral, file-less instance for tests — same table layout, backed
    /// by `redb`'s in-memory backend instead of mmap'd disk.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(engine_err)?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> Result<Self, StoreError> {
        let write_txn = db.begin_write().map_err(engine_err)?;
        {
            write_txn.open_table(DATA_TABLE).map_err(engine_err)?;
            let mut counter_table = write_txn.open_table(COUNTER_TABLE).map_err(engine_err)?;
            if counter_table.get(COUNTER_KEY).map_err(engine_err)?.is_none() {
                counter_table
                    .insert(COUNTER_KEY, 0u64)
                    .map_err(engine_err)?;
            }
        }
        write_txn.commit().map_err(engine_err)?;
        Ok(Self {
            db: Arc::new(db),
            writer_lock: Mutex::new(()),
        })
    }
}

pub struct RedbReadTxn {
    txn: Arc<redb::ReadTransaction>,
}

#[async_trait]
impl ReadTransaction for RedbReadTxn {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.txn.clone();
        let key = key.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, StoreError> {
            let table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
            Ok(table
                .get(key.as_slice())
                .map_err(engine_err)?
                .map(|v| v.value().to_vec()))
        })
        .await
        .map_err(join_err)?
    }

    async fn get_range(
        &self,
        range: KeyRange,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let txn = self.txn.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
            let table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
            scan_table(&table, &range, limit, reverse)
        })
        .await
        .map_err(join_err)?
    }
}

pub struct RedbWriteTxn<'a> {
    engine: &'a RedbEngine,
    _guard: MutexGuard<'a, ()>,
    read_txn: Arc<redb::ReadTransaction>,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    cleared_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    next_position: u64,
}

impl RedbWriteTxn<'_> {
    fn cleared(&self, key: &[u8]) -> bool {
        self.cleared_ranges
            .iter()
            .any(|(start, end)| key_in_range(key, start, end))
    }
}

#[async_trait]
impl ReadTransaction for RedbWriteTxn<'_> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = self.overlay.get(key) {
            return Ok(value.clone());
        }
        if self.cleared(key) {
            return Ok(None);
        }
        let txn = self.read_txn.clone();
        let key = key.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, StoreError> {
            let table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
            Ok(table
                .get(key.as_slice())
                .map_err(engine_err)?
                .map(|v| v.value().to_vec()))
        })
        .await
        .map_err(join_err)?
    }

    async fn get_range(
        &self,
        range: KeyRange,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let txn = self.read_txn.clone();
        let bounds = (bound_owned(&range.start), bound_owned(&range.end));
        let mut overlay_window: Vec<(Vec<u8>, Option<Vec<u8>>)> = self
            .overlay
            .range(bounds)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if reverse {
            overlay_window.reverse();
        }
        let cleared_ranges = self.cleared_ranges.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
            let table = txn.open_table(DATA_TABLE).map_err(engine_err)?;
            let base_iter = table_iter(&table, &range, reverse)?.peekable();
            merge_bounded(base_iter, &overlay_window, &cleared_ranges, reverse, limit)
        })
        .await
        .map_err(join_err)?
    }
}

#[async_trait]
impl WriteTransaction for RedbWriteTxn<'_> {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert(key, Some(value));
    }

    fn clear_range(&mut self, start: Vec<u8>, end: Vec<u8>) {
        let bounds = (StdBound::Included(start.clone()), StdBound::Excluded(end.clone()));
        let keys: Vec<Vec<u8>> = self.overlay.range(bounds).map(|(k, _)| k.clone()).collect();
        for key in keys {
            self.overlay.insert(key, None);
        }
        self.cleared_ranges.push((start, end));
    }

    fn reserve_position(&mut self) -> FactPosition {
        let position = FactPosition(self.next_position);
        self.next_position += 1;
        position
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let db = self.engine.db.clone();
        let overlay = self.overlay;
        let cleared_ranges = self.cleared_ranges;
        let next_position = self.next_position;
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let write_txn = db.begin_write().map_err(engine_err)?;
            {
                let mut table = write_txn.open_table(DATA_TABLE).map_err(engine_err)?;
                for (start, end) in &cleared_ranges {
                    let bounds = (StdBound::Included(start.as_slice()), StdBound::Excluded(end.as_slice()));
                    let keys: Vec<Vec<u8>> = table
                        .range::<&[u8]>(bounds)
                        .map_err(engine_err)?
                        .map(|entry| entry.map(|(k, _)| k.value().to_vec()).map_err(engine_err))
                        .collect::<Result<_, _>>()?;
                    for key in keys {
                        table.remove(key.as_slice()).map_err(engine_err)?;
                    }
                }
                for (key, value) in overlay {
                    match value {
                        Some(value) => {
                            table.insert(key.as_slice(), value.as_slice()).map_err(engine_err)?;
                        }
                        None => {
                            table.remove(key.as_slice()).map_err(engine_err)?;
                        }
                    }
                }
                let mut counter_table = write_txn.open_table(COUNTER_TABLE).map_err(engine_err)?;
                counter_table
                    .insert(COUNTER_KEY, next_position)
                    .map_err(engine_err)?;
            }
            write_txn.commit().map_err(engine_err)?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }
}

#[async_trait]
impl Engine for RedbEngine {
    async fn begin_read(&self) -> Result<Box<dyn ReadTransaction + '_>, StoreError> {
        let db = self.db.clone();
        let txn = tokio::task::spawn_blocking(move || db.begin_read().map_err(engine_err))
            .await
            .map_err(join_err)??;
        Ok(Box::new(RedbReadTxn { txn: Arc::new(txn) }))
    }

    async fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>, StoreError> {
        let guard = self.writer_lock.lock().await;
        let db = self.db.clone();
        let (read_txn, next_position) =
            tokio::task::spawn_blocking(move || -> Result<(redb::ReadTransaction, u64), StoreError> {
                let read_txn = db.begin_read().map_err(engine_err)?;
                let counter_table = read_txn.open_table(COUNTER_TABLE).map_err(engine_err)?;
                let next_position = counter_table
                    .get(COUNTER_KEY)
                    .map_err(engine_err)?
                    .map(|v| v.value())
                    .unwrap_or(0);
                Ok((read_txn, next_position))
            })
            .await
            .map_err(join_err)??;
        Ok(Box::new(RedbWriteTxn {
            engine: self,
            _guard: guard,
            read_txn: Arc::new(read_txn),
            overlay: BTreeMap::new(),
            cleared_ranges: Vec::new(),
            next_position,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_is_invisible_until_commit() {
        let engine = RedbEngine::open_in_memory().unwrap();
        let mut txn = engine.begin_write().await.unwrap();
        txn.put(b"k".to_vec(), b"v".to_vec());

        let reader = engine.begin_read().await.unwrap();
        assert_eq!(reader.get(b"k").await.unwrap(), None);

        txn.commit().await.unwrap();
        let reader = engine.begin_read().await.unwrap();
        assert_eq!(reader.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn reserve_position_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("position.redb");
        {
            let engine = RedbEngine::open(&path).unwrap();
            let mut txn = engine.begin_write().await.unwrap();
            txn.reserve_position();
            txn.reserve_position();
            txn.commit().await.unwrap();
        }
        let engine = RedbEngine::open(&path).unwrap();
        let mut txn = engine.begin_write().await.unwrap();
        let position = txn.reserve_position();
        assert_eq!(position.0, 2);
    }

    #[tokio::test]
    async fn clear_range_removes_persisted_and_overlaid_entries() {
        let engine = RedbEngine::open_in_memory().unwrap();
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
