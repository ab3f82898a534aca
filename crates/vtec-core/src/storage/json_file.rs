//! # JSON File Store
//!
//! The portable backing: a pretty-printed JSON array of records plus a
//! sibling `.lock` file. Writes go to a temporary file that is renamed
//! over the original, so unlocked readers always see a whole document.

use super::lock::{LockFile, LockGuard};
use super::{RecordQuery, RecordStore, remove_matching};
use crate::{VtecError, VtecRecord};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Record store backed by a JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: LockFile,
    held: Option<LockGuard>,
}

fn transport(path: &Path, action: &str, e: impl std::fmt::Display) -> VtecError {
    VtecError::Transport(format!("{} {}: {}", action, path.display(), e))
}

impl JsonFileStore {
    /// Open the store, creating the parent directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VtecError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| transport(parent, "create", e))?;
        }
        Ok(Self {
            lock: LockFile::for_store(&path),
            path,
            held: None,
        })
    }

    /// Fail lock acquisition after `timeout` instead of waiting forever.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock = self.lock.with_timeout(timeout);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<VtecRecord>, VtecError> {
        if !self.path.exists() {
            self.materialize()?;
        }
        let bytes = std::fs::read(&self.path).map_err(|e| transport(&self.path, "read", e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            VtecError::Serialization(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Create the empty document under the lock unless another writer
    /// got there first.
    fn materialize(&self) -> Result<(), VtecError> {
        let _guard = match self.held {
            Some(_) => None,
            None => Some(self.lock.acquire()?),
        };
        if !self.path.exists() {
            self.write_all(&[])?;
            tracing::info!(path = %self.path.display(), "materialized empty record store");
        }
        Ok(())
    }

    fn write_all(&self, records: &[VtecRecord]) -> Result<(), VtecError> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| VtecError::Serialization(e.to_string()))?;
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json).map_err(|e| transport(&tmp, "write", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| transport(&self.path, "replace", e))
    }

    /// Run `f` under the lock, reusing a held lock.
    fn locked<T>(
        &mut self,
        f: impl FnOnce(&Self) -> Result<T, VtecError>,
    ) -> Result<T, VtecError> {
        if self.held.is_some() {
            return f(self);
        }
        self.held = Some(self.lock.acquire()?);
        let result = f(self);
        self.held = None;
        result
    }
}

impl RecordStore for JsonFileStore {
    fn get_records(&mut self, query: &RecordQuery, lock: bool) -> Result<Vec<VtecRecord>, VtecError> {
        let acquired = lock && self.held.is_none();
        if acquired {
            self.held = Some(self.lock.acquire()?);
        }
        let records = match self.read_all() {
            Ok(records) => records,
            Err(e) => {
                // A lock held before this call stays with its owner.
                if acquired {
                    self.held = None;
                }
                return Err(e);
            }
        };
        Ok(query.filter(records))
    }

    fn put_records(&mut self, records: &[VtecRecord], lock: bool) -> Result<(), VtecError> {
        let result = self.locked(|store| store.write_all(records));
        if result.is_ok() {
            tracing::debug!(path = %self.path.display(), count = records.len(), "records written");
        }
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
