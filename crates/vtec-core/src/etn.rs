//! # ETN Allocation
//!
//! Event tracking numbers count per office, per phensig, per issuance year.
//! Tropical phensigs are numbered by the national center unless the office
//! assigns its own (Guam), in which case local numbers stay below
//! `tpc_base_etn`.

use crate::config::VtecConfig;
use crate::primitives::MAX_ETN;
use crate::{HazardEvent, Phensig, VtecError, VtecRecord};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// NATIONAL CENTER FEED
// =============================================================================

/// External lookup for nationally assigned ETNs.
pub trait NationalEtnSource: Send + Sync {
    /// ETN assigned by the national center for this event, if any.
    fn national_etn(
        &self,
        event: &HazardEvent,
        phensig: &Phensig,
        year: i32,
    ) -> Result<Option<u32>, VtecError>;
}

/// A fixed feed: event id first, then `"PH.S"`.
#[derive(Debug, Clone, Default)]
pub struct StaticNationalEtns {
    assignments: BTreeMap<String, u32>,
}

impl StaticNationalEtns {
    #[must_use]
    pub fn new(assignments: BTreeMap<String, u32>) -> Self {
        Self { assignments }
    }

    /// Feed built from the `national_etns` configuration table.
    #[must_use]
    pub fn from_config(config: &VtecConfig) -> Self {
        Self::new(config.national_etns.clone())
    }
}

impl NationalEtnSource for StaticNationalEtns {
    fn national_etn(
        &self,
        event: &HazardEvent,
        phensig: &Phensig,
        _year: i32,
    ) -> Result<Option<u32>, VtecError> {
        Ok(self
            .assignments
            .get(&event.event_id)
            .or_else(|| self.assignments.get(&phensig.to_string()))
            .copied())
    }
}

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Hands out fresh ETNs for one engine invocation.
///
/// Seeded with the ETNs already used this year; every number it hands out
/// is remembered so two NEW events in one run never share an ETN.
#[derive(Debug, Clone)]
pub struct EtnAllocator {
    used: BTreeMap<Phensig, BTreeSet<u32>>,
}

impl EtnAllocator {
    /// Seed from records of `office` issued in `year`.
    ///
    /// ROU records carry no ETN and are ignored.
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a VtecRecord>,
        office: &str,
        year: i32,
    ) -> Self {
        let mut used: BTreeMap<Phensig, BTreeSet<u32>> = BTreeMap::new();
        for record in records {
            if record.officeid != office
                || record.issue_year() != year
                || record.act == crate::Action::Rou
            {
                continue;
            }
            if let Ok(ps) = record.phensig() {
                used.entry(ps).or_default().insert(record.etn);
            }
        }
        Self { used }
    }

    /// Highest ETN seen for the phensig, optionally below a ceiling.
    #[must_use]
    pub fn highest(&self, phensig: &Phensig, below: Option<u32>) -> Option<u32> {
        let set = self.used.get(phensig)?;
        match below {
            Some(ceiling) => set.range(..ceiling).next_back().copied(),
            None => set.last().copied(),
        }
    }

    /// Next ETN: one past the highest used, never below `floor`.
    ///
    /// With a `ceiling`, numbers at or above it are ignored and allocation
    /// fails once the local range is exhausted.
    pub fn allocate(
        &mut self,
        phensig: &Phensig,
        floor: u32,
        ceiling: Option<u32>,
    ) -> Result<u32, VtecError> {
        let next = self
            .highest(phensig, ceiling)
            .map_or(1, |h| h.saturating_add(1))
            .max(floor.max(1));
        let limit = ceiling.map_or(MAX_ETN, |c| c.saturating_sub(1).min(MAX_ETN));
        if next > limit {
            return Err(VtecError::Consistency(format!(
                "ETN range exhausted for {} (next {} > {})",
                phensig, next, limit
            )));
        }
        self.reserve(phensig, next);
        Ok(next)
    }

    /// Mark an externally chosen ETN as used.
    pub fn reserve(&mut self, phensig: &Phensig, etn: u32) {
        self.used.entry(phensig.clone()).or_default().insert(etn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, GeoType, HazardStatus, ProductClass};

    fn ps(s: &str) -> Phensig {
        s.parse().expect("phensig")
    }

    fn record(office: &str, phensig: &str, etn: u32, issue: i64, act: Action) -> VtecRecord {
        let p = ps(phensig);
        VtecRecord {
            geo_id: "FLZ050".to_string(),
            officeid: office.to_string(),
            phen: p.phen().to_string(),
            sig: p.sig().to_string(),
            etn,
            act,
            start_time: issue,
            end_time: issue + 1000,
            issue_time: issue,
            purge_time: issue,
            ufn: false,
            seg: 1,
            pil: String::new(),
            event_id: None,
            hdln: String::new(),
            vtecstr: String::new(),
            product_class: ProductClass::Operational,
            hvtec: None,
        }
    }

    // 2024-03-01T00:00:00Z
    const T2024: i64 = 1_709_251_200_000;
    // 2023-03-01T00:00:00Z
    const T2023: i64 = 1_677_628_800_000;

    #[test]
    fn starts_at_one() {
        let mut alloc = EtnAllocator::from_records(&[], "KTBW", 2024);
        assert_eq!(alloc.allocate(&ps("WS.W"), 0, None).expect("etn"), 1);
        assert_eq!(alloc.allocate(&ps("WS.W"), 0, None).expect("etn"), 2);
        assert_eq!(alloc.allocate(&ps("WS.A"), 0, None).expect("etn"), 1);
    }

    #[test]
    fn continues_from_current_year_only() {
        let records = vec![
            record("KTBW", "WS.W", 7, T2024, Action::Can),
            record("KTBW", "WS.W", 40, T2023, Action::New),
            record("KMLB", "WS.W", 90, T2024, Action::New),
            record("KTBW", "HY.S", 0, T2024, Action::Rou),
        ];
        let mut alloc = EtnAllocator::from_records(&records, "KTBW", 2024);
        assert_eq!(alloc.allocate(&ps("WS.W"), 0, None).expect("etn"), 8);
    }

    #[test]
    fn floor_applies() {
        let mut alloc = EtnAllocator::from_records(&[], "KTBW", 2024);
        assert_eq!(alloc.allocate(&ps("SV.A"), 100, None).expect("etn"), 100);
    }

    #[test]
    fn ceiling_ignores_national_numbers() {
        let records = vec![
            record("PGUM", "TY.W", 1003, T2024, Action::New),
            record("PGUM", "TY.W", 4, T2024, Action::New),
        ];
        let mut alloc = EtnAllocator::from_records(&records, "PGUM", 2024);
        assert_eq!(alloc.allocate(&ps("TY.W"), 0, Some(1000)).expect("etn"), 5);
        assert_eq!(alloc.highest(&ps("TY.W"), None), Some(1003));
    }

    #[test]
    fn exhausted_range_is_an_error() {
        let records = vec![record("PGUM", "TY.W", 999, T2024, Action::New)];
        let mut alloc = EtnAllocator::from_records(&records, "PGUM", 2024);
        assert!(matches!(
            alloc.allocate(&ps("TY.W"), 0, Some(1000)),
            Err(VtecError::Consistency(_))
        ));
    }

    #[test]
    fn static_feed_prefers_event_id() {
        let feed = StaticNationalEtns::new(BTreeMap::from([
            ("HU.W".to_string(), 1005),
            ("HZ-7".to_string(), 1009),
        ]));
        let mut event = HazardEvent {
            event_id: "HZ-7".to_string(),
            phen: "HU".to_string(),
            sig: "W".to_string(),
            geo_type: GeoType::Area,
            zones: vec!["FLZ050".to_string()],
            start_time: 0,
            end_time: 1,
            ufn: false,
            status: HazardStatus::Issued,
            etn: None,
            hvtec: None,
            correction: false,
        };
        let hu = ps("HU.W");
        assert_eq!(feed.national_etn(&event, &hu, 2024).expect("feed"), Some(1009));
        event.event_id = "HZ-8".to_string();
        assert_eq!(feed.national_etn(&event, &hu, 2024).expect("feed"), Some(1005));
        assert_eq!(feed.national_etn(&event, &ps("TR.W"), 2024).expect("feed"), None);
    }
}
