//! Storage engine adapter using redb.
//!
//! Adapts redb's transactional API to the contract the bridge consumes:
//! point reads and writes with an explicit absent result, ordered
//! snapshot-consistent cursors, and atomically applied write batches.
//! The engine's own algorithms are not this crate's concern; errors
//! surface as their rendered status text.

use redb::{Database, ReadOnlyTable, ReadableTable, TableDefinition};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

// Single byte-keyed table per store; redb orders `&[u8]` keys
// byte-lexicographically.
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// Error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Backend failure, carrying the backend's rendered status text
    #[error("{0}")]
    Backend(String),
}

impl EngineError {
    fn backend(err: impl ToString) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Flags accepted by [`Store::open`], mirroring the engine's open options.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
}

/// One open store instance, backed by a database file on durable storage.
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open a store at `path` honoring the open flags.
    pub fn open(options: OpenOptions, path: &Path) -> EngineResult<Self> {
        if options.error_if_exists && path.exists() {
            return Err(EngineError::Backend(format!(
                "Invalid argument: {} exists (error_if_exists is true)",
                path.display()
            )));
        }

        let db = if options.create_if_missing {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(EngineError::backend)?;
                }
            }
            Database::create(path).map_err(EngineError::backend)?
        } else {
            Database::open(path).map_err(EngineError::backend)?
        };

        // Make sure the entries table exists so read transactions can
        // open it on a fresh database.
        let txn = db.begin_write().map_err(EngineError::backend)?;
        txn.open_table(ENTRIES).map_err(EngineError::backend)?;
        txn.commit().map_err(EngineError::backend)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Remove a store's on-disk data. Succeeds if nothing exists at `path`.
    pub fn destroy(path: &Path) -> EngineResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EngineError::backend(err)),
        }
    }

    /// Point read. Absent keys are `None`, never an error.
    pub fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(EngineError::backend)?;
        let table = txn.open_table(ENTRIES).map_err(EngineError::backend)?;
        let value = table.get(key).map_err(EngineError::backend)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let txn = self.db.begin_write().map_err(EngineError::backend)?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(EngineError::backend)?;
            let _ = table.insert(key, value).map_err(EngineError::backend)?;
        }
        txn.commit().map_err(EngineError::backend)?;
        Ok(())
    }

    /// Delete a key. Deleting an absent key succeeds (idempotent).
    pub fn delete(&self, key: &[u8]) -> EngineResult<()> {
        let txn = self.db.begin_write().map_err(EngineError::backend)?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(EngineError::backend)?;
            let _ = table.remove(key).map_err(EngineError::backend)?;
        }
        txn.commit().map_err(EngineError::backend)?;
        Ok(())
    }

    /// Apply every staged operation in `batch` atomically, in staged
    /// order; the last operation on a key wins.
    pub fn write(&self, batch: &WriteBatch) -> EngineResult<()> {
        let txn = self.db.begin_write().map_err(EngineError::backend)?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(EngineError::backend)?;
            for op in &batch.ops {
                match op {
                    BatchOp::Put(key, value) => {
                        let _ = table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(EngineError::backend)?;
                    }
                    BatchOp::Delete(key) => {
                        let _ = table.remove(key.as_slice()).map_err(EngineError::backend)?;
                    }
                }
            }
        }
        txn.commit().map_err(EngineError::backend)?;
        Ok(())
    }

    /// Open a cursor over the store's keyspace. The cursor pins its own
    /// read snapshot; writes after creation are not visible through it.
    pub fn cursor(&self) -> EngineResult<Cursor> {
        let txn = self.db.begin_read().map_err(EngineError::backend)?;
        let table = txn.open_table(ENTRIES).map_err(EngineError::backend)?;
        Ok(Cursor {
            _db: self.db.clone(),
            table,
            current: None,
            error: None,
        })
    }
}

/// An iteration position over one store's keyspace, in key order.
///
/// Positioning calls never fail for exhaustion; they leave the cursor
/// invalid and `valid()` reports it. Backend errors hit during a scan
/// also park the cursor invalid and are remembered for [`Cursor::status`].
pub struct Cursor {
    _db: Arc<Database>,
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    error: Option<String>,
}

impl Cursor {
    pub fn seek_to_first(&mut self) {
        self.probe((Bound::Unbounded, Bound::Unbounded), false);
    }

    pub fn seek_to_last(&mut self) {
        self.probe((Bound::Unbounded, Bound::Unbounded), true);
    }

    /// Position at the first key >= `target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.probe((Bound::Included(target), Bound::Unbounded), false);
    }

    /// Step to the next entry in key order. No-op on an invalid cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        let key = match &self.current {
            Some((key, _)) => key.clone(),
            None => return,
        };
        self.probe((Bound::Excluded(key.as_slice()), Bound::Unbounded), false);
    }

    /// Step to the previous entry in key order. No-op on an invalid cursor.
    pub fn prev(&mut self) {
        let key = match &self.current {
            Some((key, _)) => key.clone(),
            None => return,
        };
        self.probe((Bound::Unbounded, Bound::Excluded(key.as_slice())), true);
    }

    /// Whether the current position denotes a real entry.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(key, _)| key.as_slice())
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, value)| value.as_slice())
    }

    /// Current entry as a borrowed pair, if positioned on one.
    pub fn entry(&self) -> Option<(&[u8], &[u8])> {
        self.current
            .as_ref()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
    }

    /// Residual scan status: any backend error hit while positioning.
    pub fn status(&self) -> EngineResult<()> {
        match &self.error {
            Some(message) => Err(EngineError::Backend(message.clone())),
            None => Ok(()),
        }
    }

    // One bounded range probe against the pinned snapshot.
    fn probe(&mut self, bounds: (Bound<&[u8]>, Bound<&[u8]>), back: bool) {
        let entry = match self.table.range::<&[u8]>(bounds) {
            Ok(mut range) => {
                if back {
                    range.next_back()
                } else {
                    range.next()
                }
            }
            Err(err) => {
                self.current = None;
                self.error = Some(err.to_string());
                return;
            }
        };

        match entry {
            Some(Ok((key, value))) => {
                self.current = Some((key.value().to_vec(), value.value().to_vec()));
            }
            Some(Err(err)) => {
                self.current = None;
                self.error = Some(err.to_string());
            }
            None => self.current = None,
        }
    }
}

#[derive(Debug, Clone)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A set of staged write operations, applied atomically by [`Store::write`].
///
/// Staging never touches a store; a batch may be applied to any store,
/// multiple times.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
