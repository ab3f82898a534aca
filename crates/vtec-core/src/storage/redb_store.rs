//! # redb-backed Record Store
//!
//! The record set lives in one redb row, encoded with the binary
//! persistence format. A metadata row counts committed writes.
//!
//! redb gives crash-safe, atomic replacement of the set. The cross-call
//! store lock is the same sibling `.lock` file the JSON backend uses.

use super::lock::{LockFile, LockGuard};
use super::{RecordQuery, RecordStore, remove_matching};
use crate::formats::{records_from_bytes, records_to_bytes};
use crate::{VtecError, VtecRecord};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::time::Duration;

/// Table for the record set: key -> encoded `Vec<VtecRecord>`
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const CURRENT_KEY: &str = "current";
const GENERATION_KEY: &str = "generation";

fn io_err(e: impl std::fmt::Display) -> VtecError {
    VtecError::Transport(e.to_string())
}

/// A disk-backed record store using redb.
pub struct RedbStore {
    db: Database,
    lock: LockFile,
    held: Option<LockGuard>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("lock", &self.lock.path())
            .field("held", &self.held.is_some())
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VtecError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let db = Database::create(path).map_err(io_err)?;

        // Initialize tables if they don't exist; an empty set is materialized
        // on first open.
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            {
                let mut records = write_txn.open_table(RECORDS).map_err(io_err)?;
                if records.get(CURRENT_KEY).map_err(io_err)?.is_none() {
                    let empty = records_to_bytes(&[])?;
                    records.insert(CURRENT_KEY, empty.as_slice()).map_err(io_err)?;
                }
                let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            }
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self {
            db,
            lock: LockFile::for_store(path),
            held: None,
        })
    }

    /// Fail lock acquisition after `timeout` instead of waiting forever.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock = self.lock.with_timeout(timeout);
        self
    }

    /// Number of committed writes since the database was created.
    pub fn generation(&self) -> Result<u64, VtecError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(METADATA).map_err(io_err)?;
        Ok(table
            .get(GENERATION_KEY)
            .map_err(io_err)?
            .map(|v| v.value())
            .unwrap_or(0))
    }

    fn read_all(&self) -> Result<Vec<VtecRecord>, VtecError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(RECORDS).map_err(io_err)?;
        match table.get(CURRENT_KEY).map_err(io_err)? {
            Some(bytes) => records_from_bytes(bytes.value()),
            None => Ok(Vec::new()),
        }
    }

    fn write_all(&self, records: &[VtecRecord]) -> Result<(), VtecError> {
        let bytes = records_to_bytes(records)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(RECORDS).map_err(io_err)?;
            table.insert(CURRENT_KEY, bytes.as_slice()).map_err(io_err)?;

            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;
            let generation = meta
                .get(GENERATION_KEY)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            meta.insert(GENERATION_KEY, generation.saturating_add(1))
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        tracing::debug!(count = records.len(), "redb record set committed");
        Ok(())
    }

    fn locked<T>(
        &mut self,
        f: impl FnOnce(&Self) -> Result<T, VtecError>,
    ) -> Result<T, VtecError> {
        if self.held.is_some() {
            return f(self);
        }
        let _guard = self.lock.acquire()?;
        f(self)
    }
}

impl RecordStore for RedbStore {
    fn get_records(&mut self, query: &RecordQuery, lock: bool) -> Result<Vec<VtecRecord>, VtecError> {
        let acquired = lock && self.held.is_none();
        if acquired {
            self.held = Some(self.lock.acquire()?);
        }
        let result = self.read_all();
        if result.is_err() && acquired {
            self.held = None;
        }
        Ok(query.filter(result?))
    }

    fn put_records(&mut self, records: &[VtecRecord], lock: bool) -> Result<(), VtecError> {
        let result = self.locked(|store| store.write_all(records));
        if !lock {
            self.held = None;
        }
        result
    }

    fn delete_records(&mut self, records: &[VtecRecord]) -> Result<usize, VtecError> {
        self.locked(|store| {
            let mut current = store.read_all()?;
            let removed = remove_matching(&mut current, records);
            if removed > 0 {
                store.write_all(&current)?;
            }
            Ok(removed)
        })
    }

    fn clear(&mut self) -> Result<(), VtecError> {
        self.locked(|store| store.write_all(&[]))
    }

    fn release_lock(&mut self) -> Result<(), VtecError> {
        self.held = None;
        Ok(())
    }

    fn holds_lock(&self) -> bool {
        self.held.is_some()
    }
}
