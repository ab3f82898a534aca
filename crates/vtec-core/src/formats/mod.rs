//! # Formats
//!
//! Binary encoding of record sets. File I/O lives in the storage backends.

pub mod persistence;

pub use persistence::{
    MAX_PERSISTENCE_PAYLOAD_SIZE, PersistenceHeader, records_from_bytes, records_to_bytes,
};
