//! # Persistence Format
//!
//! Binary serialization for VTEC record sets, used by the redb backend.
//!
//! Format: Header (5 bytes) + postcard-serialized `Vec<VtecRecord>`.
//! - 4 bytes: Magic ("VTEC")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded.

use crate::{VtecError, VtecRecord, primitives};

/// Maximum allowed payload size for a stored record set.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// Header length in bytes.
const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes every encoded record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), VtecError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(VtecError::Serialization("Invalid magic bytes".to_string()));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(VtecError::Serialization(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VtecError> {
        let Some(head) = bytes.get(..HEADER_LEN) else {
            return Err(VtecError::Serialization("Header too short".to_string()));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head[0..4]);
        Ok(Self {
            magic,
            version: head[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Encode a record set (header + payload).
pub fn records_to_bytes(records: &[VtecRecord]) -> Result<Vec<u8>, VtecError> {
    let payload =
        postcard::to_stdvec(records).map_err(|e| VtecError::Serialization(e.to_string()))?;
    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Decode a record set, checking size and header first.
pub fn records_from_bytes(bytes: &[u8]) -> Result<Vec<VtecRecord>, VtecError> {
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(VtecError::Serialization(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }
    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        VtecError::Serialization(format!("Failed to deserialize record set: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, FloodRecord, FloodSeverity, HydroVtec, ProductClass};

    fn sample() -> Vec<VtecRecord> {
        let base = VtecRecord {
            geo_id: "MSC049".to_string(),
            officeid: "KJAN".to_string(),
            phen: "FL".to_string(),
            sig: "W".to_string(),
            etn: 12,
            act: Action::Ext,
            start_time: 1_700_000_000_000,
            end_time: 1_700_086_400_000,
            issue_time: 1_700_000_000_000,
            purge_time: 1_700_028_800_000,
            ufn: false,
            seg: 2,
            pil: "FLW".to_string(),
            event_id: Some("HZ-9".to_string()),
            hdln: "FLOOD WARNING".to_string(),
            vtecstr: String::new(),
            product_class: ProductClass::Test,
            hvtec: Some(HydroVtec {
                point_id: "PEAM6".to_string(),
                flood_severity: FloodSeverity::Minor,
                immediate_cause: "ER".to_string(),
                rise_above: Some(1_700_000_000_000),
                crest: None,
                fall_below: Some(1_700_050_000_000),
                flood_record: FloodRecord::NotExpected,
            }),
        };
        let mut other = base.clone();
        other.geo_id = "MSC051".to_string();
        other.hvtec = None;
        other.event_id = None;
        vec![base, other]
    }

    #[test]
    fn header_roundtrip() {
        let bytes = PersistenceHeader::new().to_bytes();
        let restored = PersistenceHeader::from_bytes(&bytes).expect("parse header");
        assert_eq!(restored, PersistenceHeader::new());
    }

    #[test]
    fn record_set_survives_encoding() {
        let records = sample();
        let bytes = records_to_bytes(&records).expect("encode");
        assert_eq!(&bytes[0..4], primitives::MAGIC_BYTES);
        assert_eq!(records_from_bytes(&bytes).expect("decode"), records);
    }

    #[test]
    fn empty_set_encodes() {
        let bytes = records_to_bytes(&[]).expect("encode");
        assert!(records_from_bytes(&bytes).expect("decode").is_empty());
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(records_from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(records_from_bytes(b"VTE").is_err());
        let mut bytes = records_to_bytes(&sample()).expect("encode");
        bytes.truncate(bytes.len() - 3);
        assert!(records_from_bytes(&bytes).is_err());
    }
}
