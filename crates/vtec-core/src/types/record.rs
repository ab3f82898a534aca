//! Persisted VTEC records and the hydrological sub-record.

use super::{Action, Phensig, ProductClass, VtecError};
use crate::primitives::UFN_END_TIME;
use crate::time::year_of;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// H-VTEC
// =============================================================================

/// H-VTEC flood severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FloodSeverity {
    /// No flooding expected.
    #[serde(rename = "N")]
    None,
    /// Areal or flash flooding; severity not categorised.
    #[serde(rename = "0")]
    Areal,
    #[serde(rename = "1")]
    Minor,
    #[serde(rename = "2")]
    Moderate,
    #[serde(rename = "3")]
    Major,
    #[serde(rename = "U")]
    Unknown,
}

impl FloodSeverity {
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::None => 'N',
            Self::Areal => '0',
            Self::Minor => '1',
            Self::Moderate => '2',
            Self::Major => '3',
            Self::Unknown => 'U',
        }
    }

    pub fn from_code(c: char) -> Result<Self, VtecError> {
        match c {
            'N' => Ok(Self::None),
            '0' => Ok(Self::Areal),
            '1' => Ok(Self::Minor),
            '2' => Ok(Self::Moderate),
            '3' => Ok(Self::Major),
            'U' => Ok(Self::Unknown),
            other => Err(VtecError::Input(format!("unknown flood severity '{}'", other))),
        }
    }
}

/// H-VTEC flood record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FloodRecord {
    /// A record flood is not expected.
    #[serde(rename = "NO")]
    NotExpected,
    /// Near record or record flood expected.
    #[serde(rename = "NR")]
    NearRecord,
    /// Flood of record status unknown.
    #[serde(rename = "UU")]
    Unknown,
    /// Used for areal and flash flood products.
    #[serde(rename = "OO")]
    NotApplicable,
}

impl FloodRecord {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotExpected => "NO",
            Self::NearRecord => "NR",
            Self::Unknown => "UU",
            Self::NotApplicable => "OO",
        }
    }

    pub fn from_code(s: &str) -> Result<Self, VtecError> {
        match s {
            "NO" => Ok(Self::NotExpected),
            "NR" => Ok(Self::NearRecord),
            "UU" => Ok(Self::Unknown),
            "OO" => Ok(Self::NotApplicable),
            other => Err(VtecError::Input(format!("unknown flood record '{}'", other))),
        }
    }
}

/// Hydrological sub-state carried by flood products.
///
/// `None` times render as `000000T0000Z`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydroVtec {
    /// Five-character NWSLI point id (`00000` for areal events).
    #[serde(rename = "pointID")]
    pub point_id: String,
    pub flood_severity: FloodSeverity,
    /// Two-character immediate cause (ER, SM, RS, DM, ...).
    pub immediate_cause: String,
    pub rise_above: Option<i64>,
    pub crest: Option<i64>,
    pub fall_below: Option<i64>,
    pub flood_record: FloodRecord,
}

// =============================================================================
// VTEC RECORD
// =============================================================================

/// The atomic unit of the record store: one event on one zone.
///
/// Field names serialize in the portable camelCase layout
/// (`geoId`, `officeid`, `startTime`, `eventID`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VtecRecord {
    /// Zone identifier, e.g. `FLZ050`, `FLC049`, `GMZ870`.
    pub geo_id: String,
    /// Four-character issuing office.
    pub officeid: String,
    pub phen: String,
    pub sig: String,
    pub etn: u32,
    pub act: Action,
    pub start_time: i64,
    /// `UFN_END_TIME` when `ufn` is set.
    pub end_time: i64,
    pub issue_time: i64,
    pub purge_time: i64,
    #[serde(default)]
    pub ufn: bool,
    #[serde(default)]
    pub seg: u32,
    #[serde(default)]
    pub pil: String,
    #[serde(default, rename = "eventID")]
    pub event_id: Option<String>,
    #[serde(default)]
    pub hdln: String,
    #[serde(default)]
    pub vtecstr: String,
    #[serde(default)]
    pub product_class: ProductClass,
    #[serde(default)]
    pub hvtec: Option<HydroVtec>,
}

/// Identity of a record within the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub officeid: String,
    pub phen: String,
    pub sig: String,
    pub etn: u32,
    pub geo_id: String,
    pub product_class: ProductClass,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{:04}@{}",
            self.product_class, self.officeid, self.phen, self.sig, self.etn, self.geo_id
        )
    }
}

impl VtecRecord {
    /// The record's phensig.
    pub fn phensig(&self) -> Result<Phensig, VtecError> {
        Phensig::new(&self.phen, &self.sig)
    }

    /// True when the record's phen/sig equal the pair.
    #[must_use]
    pub fn is(&self, phensig: &Phensig) -> bool {
        phensig.matches(&self.phen, &self.sig)
    }

    /// Calendar year of issuance (UTC).
    #[must_use]
    pub fn issue_year(&self) -> i32 {
        year_of(self.issue_time)
    }

    /// Effective end time, honoring the UFN sentinel.
    #[must_use]
    pub fn effective_end(&self) -> i64 {
        if self.ufn { UFN_END_TIME } else { self.end_time }
    }

    /// True once the event's end time has arrived.
    #[must_use]
    pub fn has_ended_by(&self, time: i64) -> bool {
        !self.ufn && self.end_time <= time
    }

    /// True when the time ranges of the two records overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start_time < other.effective_end() && other.start_time < self.effective_end()
    }

    /// True when the record shares office, phensig, zone and product class.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        self.officeid == other.officeid
            && self.phen == other.phen
            && self.sig == other.sig
            && self.geo_id == other.geo_id
            && self.product_class == other.product_class
    }

    /// The record's identity.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey {
            officeid: self.officeid.clone(),
            phen: self.phen.clone(),
            sig: self.sig.clone(),
            etn: self.etn,
            geo_id: self.geo_id.clone(),
            product_class: self.product_class,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start: i64, end: i64, ufn: bool) -> VtecRecord {
        VtecRecord {
            geo_id: "FLZ050".to_string(),
            officeid: "KTBW".to_string(),
            phen: "WS".to_string(),
            sig: "W".to_string(),
            etn: 1,
            act: Action::New,
            start_time: start,
            end_time: if ufn { UFN_END_TIME } else { end },
            issue_time: 0,
            purge_time: 0,
            ufn,
            seg: 1,
            pil: "WSW".to_string(),
            event_id: None,
            hdln: String::new(),
            vtecstr: String::new(),
            product_class: ProductClass::Operational,
            hvtec: None,
        }
    }

    #[test]
    fn overlap_is_strict() {
        let a = record(0, 100, false);
        let b = record(100, 200, false);
        let c = record(50, 150, false);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn ufn_never_ends() {
        let r = record(0, 0, true);
        assert!(!r.has_ended_by(i64::MAX));
        assert_eq!(r.effective_end(), UFN_END_TIME);
    }

    #[test]
    fn serializes_with_portable_field_names() {
        let mut r = record(0, 100, false);
        r.event_id = Some("HZ-1".to_string());
        let json = serde_json::to_value(&r).expect("json");
        assert_eq!(json["geoId"], "FLZ050");
        assert_eq!(json["officeid"], "KTBW");
        assert_eq!(json["eventID"], "HZ-1");
        assert_eq!(json["act"], "NEW");
        assert_eq!(json["productClass"], "O");
    }

    #[test]
    fn flood_codes_round_trip() {
        for c in ['N', '0', '1', '2', '3', 'U'] {
            assert_eq!(FloodSeverity::from_code(c).expect("code").code(), c);
        }
        for s in ["NO", "NR", "UU", "OO"] {
            assert_eq!(FloodRecord::from_code(s).expect("code").code(), s);
        }
    }
}
