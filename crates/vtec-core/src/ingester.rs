//! # Ingester Module
//!
//! Merges analyzed records into the record set under the store lock.
//!
//! - Validate analyzed records before touching the store
//! - Squeeze the current set, expand statewide records, anchor cross-year
//!   events to their issuance year
//! - Replace superseded rows and append the new ones
//! - Write everything or nothing

use crate::config::VtecConfig;
use crate::primitives::{MAX_ETN, STATEWIDE_SUFFIX};
use crate::squeeze::TableSqueezer;
use crate::storage::{RecordQuery, RecordStore};
use crate::time::{last_minute_of_year, year_of};
use crate::{Action, PolicyWarning, VtecError, VtecRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Merge-time state of a record. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    /// Already in the store.
    Previous,
    /// Arrived with this merge.
    Decoded,
    /// Superseded by a decoded record.
    Replaced,
    /// Removed by the squeezer.
    Purged,
}

#[derive(Debug, Clone)]
struct Tagged {
    record: VtecRecord,
    state: RecordState,
}

/// Result bundle of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    /// The new canonical set to persist.
    pub updated_vtec_records: Vec<VtecRecord>,
    /// Prior records superseded by this merge.
    pub replaced_records: Vec<VtecRecord>,
    /// Analyzed records that entered the set.
    pub decoded_records: Vec<VtecRecord>,
    /// Prior records left untouched.
    pub other_records: Vec<VtecRecord>,
    /// Records the squeezer removed.
    pub purged_records: Vec<VtecRecord>,
    /// False if and only if the persisted set is unchanged.
    pub db_changed: bool,
    pub warnings: Vec<PolicyWarning>,
}

/// Total order used to compare record sets.
fn canonical_cmp(a: &VtecRecord, b: &VtecRecord) -> Ordering {
    a.officeid
        .cmp(&b.officeid)
        .then_with(|| a.phen.cmp(&b.phen))
        .then_with(|| a.sig.cmp(&b.sig))
        .then_with(|| a.product_class.cmp(&b.product_class))
        .then_with(|| a.etn.cmp(&b.etn))
        .then_with(|| a.geo_id.cmp(&b.geo_id))
        .then_with(|| a.issue_time.cmp(&b.issue_time))
        .then_with(|| a.act.cmp(&b.act))
        .then_with(|| a.start_time.cmp(&b.start_time))
        .then_with(|| a.end_time.cmp(&b.end_time))
        .then_with(|| a.seg.cmp(&b.seg))
        .then_with(|| a.vtecstr.cmp(&b.vtecstr))
}

fn same_event(a: &VtecRecord, b: &VtecRecord) -> bool {
    a.officeid == b.officeid
        && a.phen == b.phen
        && a.sig == b.sig
        && a.etn == b.etn
        && a.product_class == b.product_class
}

fn is_statewide(geo_id: &str) -> bool {
    geo_id.len() > STATEWIDE_SUFFIX.len() && geo_id.ends_with(STATEWIDE_SUFFIX)
}

/// The Ingester merges analyzed records into the record set.
#[derive(Debug, Clone, Copy)]
pub struct Ingester<'a> {
    config: &'a VtecConfig,
}

impl<'a> Ingester<'a> {
    #[must_use]
    pub fn new(config: &'a VtecConfig) -> Self {
        Self { config }
    }

    /// Validate an analyzed record.
    ///
    /// A record is valid if:
    /// - Zone and four-character office are present
    /// - Phensig is known to the configuration
    /// - ETN fits four digits
    /// - It starts before it ends, unless UFN or routine
    pub fn validate(&self, record: &VtecRecord) -> Result<(), VtecError> {
        if record.geo_id.trim().is_empty() {
            return Err(VtecError::Input("record without zone".to_string()));
        }
        if record.officeid.len() != 4 {
            return Err(VtecError::Input(format!(
                "record office '{}' must be four characters",
                record.officeid
            )));
        }
        let phensig = record.phensig()?;
        if self.config.hazard_type(&phensig).is_none() {
            return Err(VtecError::Input(format!("unknown phensig {}", phensig)));
        }
        if record.etn > MAX_ETN {
            return Err(VtecError::Input(format!("ETN {} exceeds {}", record.etn, MAX_ETN)));
        }
        if !record.ufn && record.act != Action::Rou && record.start_time >= record.end_time {
            return Err(VtecError::Input(format!(
                "record {} starts at or after its end",
                record.key()
            )));
        }
        Ok(())
    }

    /// Merge `analyzed` into `current` as of `issue_time`.
    pub fn merge(
        &self,
        analyzed: &[VtecRecord],
        current: Vec<VtecRecord>,
        issue_time: i64,
    ) -> Result<MergeResult, VtecError> {
        let mut warnings = Vec::new();

        // 1. Decoded records carry this merge's issue time.
        let mut incoming = Vec::with_capacity(analyzed.len());
        for record in analyzed {
            self.validate(record)?;
            let mut record = record.clone();
            record.issue_time = issue_time;
            incoming.push(record);
        }

        // 2-3. Previous records, minus what the squeezer drops.
        let mut original = current.clone();
        let squeezed = TableSqueezer::new(self.config).squeeze(current, issue_time);
        let mut table: Vec<Tagged> = squeezed
            .kept
            .into_iter()
            .map(|record| Tagged {
                record,
                state: RecordState::Previous,
            })
            .collect();
        let purged: Vec<Tagged> = squeezed
            .purged
            .into_iter()
            .map(|record| Tagged {
                record,
                state: RecordState::Purged,
            })
            .collect();

        // 4. Statewide expansion.
        let incoming = self.expand_statewide(incoming, &table, issue_time, &mut warnings);

        // 5. Cross-year anchoring.
        let mut incoming = incoming;
        for record in incoming.iter_mut() {
            self.anchor_to_issuance_year(record, &table)?;
        }

        // 8 (first half). Corrections take the prior record's action.
        let mut decoded = Vec::with_capacity(incoming.len());
        for mut record in incoming {
            if record.act == Action::Rou {
                continue;
            }
            if record.act == Action::Cor {
                let prior = table
                    .iter()
                    .map(|t| &t.record)
                    .filter(|p| same_event(p, &record) && p.geo_id == record.geo_id)
                    .max_by_key(|p| p.issue_time);
                match prior {
                    Some(prior) => record.act = prior.act,
                    None => {
                        let warning = PolicyWarning::CorrectionUnmatched {
                            record: Box::new(record),
                        };
                        tracing::warn!(%warning, "correction dropped");
                        warnings.push(warning);
                        continue;
                    }
                }
            }
            decoded.push(record);
        }

        // 6-7. Replacement, per issuance year.
        for tagged in table.iter_mut() {
            let existing = &tagged.record;
            let superseded = decoded.iter().any(|new| {
                new.same_slot(existing)
                    && year_of(new.issue_time) == existing.issue_year()
                    && (new.etn == existing.etn
                        || (new.etn > existing.etn
                            && (existing.act.is_terminal() || existing.has_ended_by(issue_time))))
            });
            if superseded {
                tagged.state = RecordState::Replaced;
            }
        }

        // 8 (second half). Append.
        table.extend(decoded.into_iter().map(|record| Tagged {
            record,
            state: RecordState::Decoded,
        }));

        // 9. Split by state.
        let mut result = MergeResult {
            warnings,
            ..MergeResult::default()
        };
        for Tagged { record, state } in table.into_iter().chain(purged) {
            match state {
                RecordState::Previous => {
                    result.other_records.push(record.clone());
                    result.updated_vtec_records.push(record);
                }
                RecordState::Decoded => {
                    result.decoded_records.push(record.clone());
                    result.updated_vtec_records.push(record);
                }
                RecordState::Replaced => result.replaced_records.push(record),
                RecordState::Purged => result.purged_records.push(record),
            }
        }
        result.updated_vtec_records.sort_by(canonical_cmp);
        original.sort_by(canonical_cmp);
        result.db_changed = original != result.updated_vtec_records;

        tracing::info!(
            decoded = result.decoded_records.len(),
            replaced = result.replaced_records.len(),
            purged = result.purged_records.len(),
            total = result.updated_vtec_records.len(),
            changed = result.db_changed,
            "records merged"
        );
        Ok(result)
    }

    /// Re-read under lock, merge, write back and release.
    ///
    /// Any failure after the lock is taken releases it without writing.
    pub fn merge_into_store(
        &self,
        store: &mut dyn RecordStore,
        analyzed: &[VtecRecord],
        issue_time: i64,
    ) -> Result<MergeResult, VtecError> {
        for record in analyzed {
            self.validate(record)?;
        }
        let current = store.get_records(&RecordQuery::all(), true)?;
        let result = match self.merge(analyzed, current, issue_time) {
            Ok(result) => result,
            Err(e) => {
                release_quietly(store);
                return Err(e);
            }
        };
        let written = if result.db_changed {
            store.put_records(&result.updated_vtec_records, false)
        } else {
            store.release_lock()
        };
        if let Err(e) = written {
            release_quietly(store);
            return Err(e);
        }
        Ok(result)
    }

    /// Replace each `XX?000` record by copies on the concrete zones of the
    /// same event.
    fn expand_statewide(
        &self,
        incoming: Vec<VtecRecord>,
        table: &[Tagged],
        issue_time: i64,
        warnings: &mut Vec<PolicyWarning>,
    ) -> Vec<VtecRecord> {
        let mut expanded = Vec::with_capacity(incoming.len());
        for record in incoming {
            if !is_statewide(&record.geo_id) {
                expanded.push(record);
                continue;
            }
            let prefix = &record.geo_id[..record.geo_id.len() - STATEWIDE_SUFFIX.len()];
            let zones: BTreeSet<&str> = table
                .iter()
                .map(|t| &t.record)
                .filter(|e| {
                    same_event(e, &record)
                        && e.geo_id.starts_with(prefix)
                        && !is_statewide(&e.geo_id)
                        && !e.act.is_terminal()
                        && (record.act == Action::Exp || !e.has_ended_by(issue_time))
                })
                .map(|e| e.geo_id.as_str())
                .collect();
            if zones.is_empty() {
                let warning = PolicyWarning::UnexpandedStatewide {
                    phensig: format!("{}.{}", record.phen, record.sig),
                    geo_id: record.geo_id.clone(),
                    etn: record.etn,
                };
                tracing::warn!(%warning, "statewide record dropped");
                warnings.push(warning);
                continue;
            }
            tracing::debug!(geo_id = %record.geo_id, zones = zones.len(), "statewide record expanded");
            for zone in zones {
                let mut copy = record.clone();
                copy.geo_id = zone.to_string();
                expanded.push(copy);
            }
        }
        expanded
    }

    /// Keep a continuing event's issuance year when the merge crosses
    /// into a new calendar year.
    fn anchor_to_issuance_year(&self, record: &mut VtecRecord, table: &[Tagged]) -> Result<(), VtecError> {
        if matches!(record.act, Action::New | Action::Rou) {
            return Ok(());
        }
        let year = year_of(record.issue_time);
        let Some(earliest) = table
            .iter()
            .map(|t| &t.record)
            .filter(|e| same_event(e, record) && e.issue_year() < year && e.overlaps(record))
            .map(|e| e.issue_year())
            .min()
        else {
            return Ok(());
        };
        if earliest != year - 1 {
            return Err(VtecError::Consistency(format!(
                "{} {}.{} {:04} was issued in {}, more than one year before {}",
                record.officeid, record.phen, record.sig, record.etn, earliest, year
            )));
        }
        record.issue_time = last_minute_of_year(earliest)?;
        tracing::debug!(etn = record.etn, year = earliest, "issue time anchored to prior year");
        Ok(())
    }
}

fn release_quietly(store: &mut dyn RecordStore) {
    if let Err(e) = store.release_lock() {
        tracing::warn!(error = %e, "failed to release store lock");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::MS_PER_HOUR;
    use crate::storage::MemoryStore;
    use crate::time::parse_rfc3339;
    use crate::ProductClass;

    fn t(s: &str) -> i64 {
        parse_rfc3339(s).expect("time")
    }

    fn record(phensig: &str, geo: &str, etn: u32, act: Action, issue: i64, start: i64, end: i64) -> VtecRecord {
        let (phen, sig) = phensig.split_once('.').expect("phensig");
        VtecRecord {
            geo_id: geo.to_string(),
            officeid: "KTBW".to_string(),
            phen: phen.to_string(),
            sig: sig.to_string(),
            etn,
            act,
            start_time: start,
            end_time: end,
            issue_time: issue,
            purge_time: issue,
            ufn: false,
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
    fn same_etn_replaces_previous_row() {
        let config = VtecConfig::builtin();
        let issue = t("2024-01-15T05:10:00Z");
        let start = t("2024-01-15T12:00:00Z");
        let end = t("2024-01-16T00:00:00Z");
        let existing = vec![record("WS.W", "FLZ050", 1, Action::New, issue, start, end)];
        let later = issue + MS_PER_HOUR;
        let incoming = vec![record("WS.W", "FLZ050", 1, Action::Con, 0, start, end)];
        let result = Ingester::new(&config).merge(&incoming, existing, later).expect("merge");
        assert_eq!(result.updated_vtec_records.len(), 1);
        assert_eq!(result.updated_vtec_records[0].act, Action::Con);
        assert_eq!(result.updated_vtec_records[0].issue_time, later);
        assert_eq!(result.replaced_records.len(), 1);
        assert!(result.db_changed);
    }

    #[test]
    fn remerge_is_unchanged() {
        let config = VtecConfig::builtin();
        let issue = t("2024-01-15T05:10:00Z");
        let start = t("2024-01-15T12:00:00Z");
        let end = t("2024-01-16T00:00:00Z");
        let incoming = vec![
            record("WS.W", "FLZ050", 1, Action::New, 0, start, end),
            record("WS.W", "FLZ051", 1, Action::New, 0, start, end),
        ];
        let ingester = Ingester::new(&config);
        let first = ingester.merge(&incoming, Vec::new(), issue).expect("merge");
        assert!(first.db_changed);
        let second = ingester
            .merge(&incoming, first.updated_vtec_records.clone(), issue)
            .expect("merge");
        assert!(!second.db_changed);
        assert_eq!(second.updated_vtec_records, first.updated_vtec_records);
    }

    #[test]
    fn higher_etn_replaces_finished_row_only() {
        let config = VtecConfig::builtin();
        let issue = t("2024-04-01T01:22:00Z");
        let old_start = t("2024-04-01T00:00:00Z");
        let existing = vec![
            record("FA.W", "FLC049", 1, Action::Can, issue - MS_PER_HOUR, old_start, issue),
            record("FA.W", "FLC051", 1, Action::New, issue - MS_PER_HOUR, old_start, issue + MS_PER_HOUR),
        ];
        let incoming = vec![
            record("FA.W", "FLC049", 2, Action::New, 0, issue, issue + MS_PER_HOUR),
            record("FA.W", "FLC051", 2, Action::New, 0, issue, issue + MS_PER_HOUR),
        ];
        let result = Ingester::new(&config).merge(&incoming, existing, issue).expect("merge");
        let replaced: Vec<&str> = result.replaced_records.iter().map(|r| r.geo_id.as_str()).collect();
        assert_eq!(replaced, vec!["FLC049"]);
        assert_eq!(result.other_records.len(), 1);
        assert_eq!(result.updated_vtec_records.len(), 3);
    }

    #[test]
    fn routine_records_are_not_persisted() {
        let config = VtecConfig::builtin();
        let issue = t("2024-04-01T01:22:00Z");
        let incoming = vec![record("HY.S", "FLC049", 0, Action::Rou, 0, issue, issue)];
        let result = Ingester::new(&config).merge(&incoming, Vec::new(), issue).expect("merge");
        assert!(result.updated_vtec_records.is_empty());
        assert!(!result.db_changed);
    }

    #[test]
    fn statewide_record_expands_to_active_zones() {
        let config = VtecConfig::builtin();
        let issue = t("2024-05-01T18:00:00Z");
        let end = issue + 4 * MS_PER_HOUR;
        let existing = vec![
            record("TO.A", "FLC017", 115, Action::New, issue - MS_PER_HOUR, issue, end),
            record("TO.A", "FLC053", 115, Action::New, issue - MS_PER_HOUR, issue, end),
            record("TO.A", "GAC001", 115, Action::New, issue - MS_PER_HOUR, issue, end),
        ];
        let incoming = vec![record("TO.A", "FLC000", 115, Action::Can, 0, issue, end)];
        let result = Ingester::new(&config).merge(&incoming, existing, issue).expect("merge");
        let cancelled: Vec<&str> = result
            .decoded_records
            .iter()
            .map(|r| r.geo_id.as_str())
            .collect();
        assert_eq!(cancelled, vec!["FLC017", "FLC053"]);
        assert_eq!(result.other_records.len(), 1);
    }

    #[test]
    fn statewide_without_zones_warns() {
        let config = VtecConfig::builtin();
        let issue = t("2024-05-01T18:00:00Z");
        let incoming = vec![record("TO.A", "FLC000", 115, Action::Can, 0, issue, issue + MS_PER_HOUR)];
        let result = Ingester::new(&config).merge(&incoming, Vec::new(), issue).expect("merge");
        assert!(result.decoded_records.is_empty());
        assert!(matches!(
            result.warnings.as_slice(),
            [PolicyWarning::UnexpandedStatewide { etn: 115, .. }]
        ));
    }

    #[test]
    fn unmatched_correction_is_returned() {
        let config = VtecConfig::builtin();
        let issue = t("2024-04-01T01:22:00Z");
        let incoming = vec![record("FA.W", "FLC049", 3, Action::Cor, 0, issue, issue + MS_PER_HOUR)];
        let result = Ingester::new(&config).merge(&incoming, Vec::new(), issue).expect("merge");
        assert!(result.updated_vtec_records.is_empty());
        assert!(matches!(
            result.warnings.as_slice(),
            [PolicyWarning::CorrectionUnmatched { record }] if record.etn == 3
        ));
    }

    #[test]
    fn correction_inherits_prior_action() {
        let config = VtecConfig::builtin();
        let issue = t("2024-04-01T01:22:00Z");
        let existing = vec![record("FA.W", "FLC049", 3, Action::Ext, issue - 60_000, issue, issue + MS_PER_HOUR)];
        let incoming = vec![record("FA.W", "FLC049", 3, Action::Cor, 0, issue, issue + MS_PER_HOUR)];
        let result = Ingester::new(&config).merge(&incoming, existing, issue).expect("merge");
        assert_eq!(result.updated_vtec_records.len(), 1);
        assert_eq!(result.updated_vtec_records[0].act, Action::Ext);
    }

    #[test]
    fn multi_year_event_is_a_consistency_error() {
        let config = VtecConfig::builtin();
        let issued = t("2022-12-28T00:00:00Z");
        let ends = t("2024-02-01T00:00:00Z");
        let existing = record("FA.Y", "FLC049", 3, Action::Ext, issued, issued, ends);
        let mut incoming = existing.clone();
        incoming.act = Action::Con;
        let now = t("2024-01-02T00:00:00Z");
        assert!(matches!(
            Ingester::new(&config).merge(&[incoming], vec![existing], now),
            Err(VtecError::Consistency(_))
        ));
    }

    #[test]
    fn invalid_record_is_rejected_before_locking() {
        let config = VtecConfig::builtin();
        let mut store = MemoryStore::new();
        let bad = record("ZZ.W", "FLC049", 1, Action::New, 0, 0, 10);
        assert!(Ingester::new(&config).merge_into_store(&mut store, &[bad], 0).is_err());
        assert!(!store.holds_lock());
    }

    #[test]
    fn merge_into_store_writes_and_releases() {
        let config = VtecConfig::builtin();
        let issue = t("2024-01-15T05:10:00Z");
        let mut store = MemoryStore::new();
        let incoming = vec![record("WS.W", "FLZ050", 1, Action::New, 0, issue, issue + MS_PER_HOUR)];
        let result = Ingester::new(&config)
            .merge_into_store(&mut store, &incoming, issue)
            .expect("merge");
        assert!(result.db_changed);
        assert_eq!(store.records().len(), 1);
        assert!(!store.holds_lock());
    }
}
