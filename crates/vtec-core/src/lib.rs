//! # vtec-core
//!
//! The deterministic VTEC engine.
//!
//! Given the hazards a forecaster has proposed and the records of what was
//! issued before, this crate decides which action code each zone gets
//! (NEW, CON, EXT, EXA, EXB, UPG, CAN, EXP, COR, ROU), assigns event
//! tracking numbers, and merges the issued product back into the record
//! store.
//!
//! ## Components
//!
//! - `storage`: the record store (memory, JSON file, redb) with its
//!   exclusive lock
//! - `squeeze`: purges records that can no longer affect analysis
//! - `engine`: proposal + history → analyzed records
//! - `ingester`: analyzed records + history → new history
//! - `processor`: one issuance end to end
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network
//! - Deterministic: ordered maps only; time always comes from the caller
//! - Configuration is loaded once and passed by reference

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod engine;
pub mod etn;
pub mod formats;
pub mod ingester;
pub mod primitives;
pub mod processor;
pub mod squeeze;
pub mod storage;
pub mod time;
pub mod types;
pub mod vtec;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Action, FloodRecord, FloodSeverity, GeoType, HazardEvent, HazardStatus, HydroVtec, Phensig,
    PolicyWarning, ProductClass, RecordKey, VtecError, VtecRecord,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use config::{ConfigSource, HazardType, ProductCategory, VtecConfig};
pub use engine::{AnalysisOutcome, AnalysisRequest, VtecEngine};
pub use etn::{EtnAllocator, NationalEtnSource, StaticNationalEtns};
pub use ingester::{Ingester, MergeResult};
pub use processor::{IssueOutcome, VtecProcessor};
pub use squeeze::{SqueezeResult, TableSqueezer, is_live};
pub use vtec::{VtecString, vtec_line};

// =============================================================================
// RE-EXPORTS: Storage and Formats
// =============================================================================

pub use formats::{PersistenceHeader, records_from_bytes, records_to_bytes};
pub use storage::{
    Backoff, JsonFileStore, MemoryStore, RecordQuery, RecordStore, RedbStore, StoreBackend,
};
