//! # Record Storage
//!
//! Durable storage of VTEC records with exclusive-writer semantics.
//!
//! Every backend honours the same contract:
//! - `get_records(.., lock = true)` acquires the store lock and keeps it
//!   until a `put_records(.., lock = false)` or `release_lock()`.
//! - `put_records` replaces the whole stored set.
//! - A store that was never written reads as an empty set.
//! - An unreachable backend fails with [`VtecError::Transport`].
//!
//! ## Backends
//!
//! - `MemoryStore`: in-process, volatile
//! - `JsonFileStore`: JSON array file with a sibling `.lock` file
//! - `RedbStore`: redb database holding a postcard-encoded record set
//!
//! The network-backed store lives in the application crate.

mod json_file;
mod lock;
mod memory;
mod redb_store;

pub use json_file::JsonFileStore;
pub use lock::{Backoff, LockFile, LockGuard};
pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::{Phensig, ProductClass, VtecError, VtecRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// QUERY
// =============================================================================

/// Selection criteria for `get_records`. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordQuery {
    #[serde(default)]
    pub office: Option<String>,
    #[serde(default)]
    pub phensigs: Vec<Phensig>,
    #[serde(default)]
    pub geo_ids: Vec<String>,
    #[serde(default)]
    pub product_class: Option<ProductClass>,
}

impl RecordQuery {
    /// Match every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Match one office.
    #[must_use]
    pub fn for_office(office: impl Into<String>) -> Self {
        Self {
            office: Some(office.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, record: &VtecRecord) -> bool {
        self.office.as_ref().is_none_or(|o| *o == record.officeid)
            && (self.phensigs.is_empty() || self.phensigs.iter().any(|ps| record.is(ps)))
            && (self.geo_ids.is_empty() || self.geo_ids.contains(&record.geo_id))
            && self.product_class.is_none_or(|pc| pc == record.product_class)
    }

    /// Keep only the matching records.
    #[must_use]
    pub fn filter(&self, records: Vec<VtecRecord>) -> Vec<VtecRecord> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// The record store contract shared by every backend.
pub trait RecordStore {
    /// Current records matching `query`; `lock = true` also takes the store lock.
    fn get_records(&mut self, query: &RecordQuery, lock: bool) -> Result<Vec<VtecRecord>, VtecError>;

    /// Replace the stored set. The lock is released unless `lock` is true.
    fn put_records(&mut self, records: &[VtecRecord], lock: bool) -> Result<(), VtecError>;

    /// Remove records with the same identity and issue time; returns the count removed.
    fn delete_records(&mut self, records: &[VtecRecord]) -> Result<usize, VtecError>;

    /// Empty the store.
    fn clear(&mut self) -> Result<(), VtecError>;

    /// Give up the lock without writing. A no-op when not held.
    fn release_lock(&mut self) -> Result<(), VtecError>;

    /// True while this handle holds the store lock.
    fn holds_lock(&self) -> bool;
}

/// Drop every record in `current` that matches one in `doomed`.
pub(crate) fn remove_matching(current: &mut Vec<VtecRecord>, doomed: &[VtecRecord]) -> usize {
    let before = current.len();
    current.retain(|r| {
        !doomed
            .iter()
            .any(|d| d.issue_time == r.issue_time && d.key() == r.key())
    });
    before - current.len()
}

// =============================================================================
// BACKEND SELECTION
// =============================================================================

/// Local durable backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Json,
    Redb,
}

impl StoreBackend {
    /// Open (creating if needed) a store of this kind at `path`.
    pub fn open(self, path: impl AsRef<Path>) -> Result<Box<dyn RecordStore + Send>, VtecError> {
        self.open_with_lock_timeout(path, None)
    }

    /// Like [`StoreBackend::open`], failing lock waits after `timeout`.
    pub fn open_with_lock_timeout(
        self,
        path: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn RecordStore + Send>, VtecError> {
        Ok(match self {
            Self::Json => Box::new(JsonFileStore::open(path)?.with_lock_timeout(timeout)),
            Self::Redb => Box::new(RedbStore::open(path)?.with_lock_timeout(timeout)),
        })
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Redb => "redb",
        })
    }
}

impl FromStr for StoreBackend {
    type Err = VtecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "redb" => Ok(Self::Redb),
            other => Err(VtecError::Config(format!("unknown store backend '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Action;

    fn record(office: &str, phensig: &str, geo: &str, class: ProductClass) -> VtecRecord {
        let ps: Phensig = phensig.parse().expect("phensig");
        VtecRecord {
            geo_id: geo.to_string(),
            officeid: office.to_string(),
            phen: ps.phen().to_string(),
            sig: ps.sig().to_string(),
            etn: 1,
            act: Action::New,
            start_time: 0,
            end_time: 10,
            issue_time: 0,
            purge_time: 0,
            ufn: false,
            seg: 1,
            pil: String::new(),
            event_id: None,
            hdln: String::new(),
            vtecstr: String::new(),
            product_class: class,
            hvtec: None,
        }
    }

    #[test]
    fn empty_query_matches_all() {
        let r = record("KTBW", "WS.W", "FLZ050", ProductClass::Test);
        assert!(RecordQuery::all().matches(&r));
    }

    #[test]
    fn query_filters_each_field() {
        let r = record("KTBW", "WS.W", "FLZ050", ProductClass::Operational);
        assert!(RecordQuery::for_office("KTBW").matches(&r));
        assert!(!RecordQuery::for_office("KMLB").matches(&r));

        let mut q = RecordQuery::all();
        q.phensigs = vec!["WS.A".parse().expect("ps"), "WS.W".parse().expect("ps")];
        assert!(q.matches(&r));
        q.geo_ids = vec!["FLZ051".to_string()];
        assert!(!q.matches(&r));

        let q = RecordQuery {
            product_class: Some(ProductClass::Test),
            ..RecordQuery::all()
        };
        assert!(!q.matches(&r));
    }

    #[test]
    fn remove_matching_uses_identity_and_issue_time() {
        let a = record("KTBW", "WS.W", "FLZ050", ProductClass::Operational);
        let mut b = a.clone();
        b.issue_time = 5;
        let mut current = vec![a.clone(), b];
        assert_eq!(remove_matching(&mut current, &[a]), 1);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].issue_time, 5);
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("JSON".parse::<StoreBackend>().expect("json"), StoreBackend::Json);
        assert_eq!("redb".parse::<StoreBackend>().expect("redb"), StoreBackend::Redb);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}
