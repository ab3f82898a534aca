//! In-process record store.

use super::{RecordQuery, RecordStore, remove_matching};
use crate::{VtecError, VtecRecord};

/// A volatile store. The lock is a flag owned by this handle.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<VtecRecord>,
    locked: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with `records`.
    #[must_use]
    pub fn with_records(records: Vec<VtecRecord>) -> Self {
        Self {
            records,
            locked: false,
        }
    }

    /// Every stored record.
    #[must_use]
    pub fn records(&self) -> &[VtecRecord] {
        &self.records
    }
}

impl RecordStore for MemoryStore {
    fn get_records(&mut self, query: &RecordQuery, lock: bool) -> Result<Vec<VtecRecord>, VtecError> {
        if lock {
            self.locked = true;
        }
        Ok(query.filter(self.records.clone()))
    }

    fn put_records(&mut self, records: &[VtecRecord], lock: bool) -> Result<(), VtecError> {
        self.records = records.to_vec();
        self.locked = lock;
        Ok(())
    }

    fn delete_records(&mut self, records: &[VtecRecord]) -> Result<usize, VtecError> {
        Ok(remove_matching(&mut self.records, records))
    }

    fn clear(&mut self) -> Result<(), VtecError> {
        self.records.clear();
        Ok(())
    }

    fn release_lock(&mut self) -> Result<(), VtecError> {
        self.locked = false;
        Ok(())
    }

    fn holds_lock(&self) -> bool {
        self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_unlocked() {
        let mut store = MemoryStore::new();
        assert!(store.get_records(&RecordQuery::all(), false).expect("get").is_empty());
        assert!(!store.holds_lock());
    }

    #[test]
    fn lock_lifecycle() {
        let mut store = MemoryStore::new();
        store.get_records(&RecordQuery::all(), true).expect("get");
        assert!(store.holds_lock());
        store.put_records(&[], true).expect("put");
        assert!(store.holds_lock());
        store.put_records(&[], false).expect("put");
        assert!(!store.holds_lock());
        store.get_records(&RecordQuery::all(), true).expect("get");
        store.release_lock().expect("release");
        assert!(!store.holds_lock());
    }
}
