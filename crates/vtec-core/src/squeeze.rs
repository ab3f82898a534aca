//! # Table Squeezer
//!
//! Removes records that can no longer influence analysis.
//!
//! Passes, in order:
//! 1. Stale UFN: a UFN record older than 14 days that was never ended is
//!    rewritten to CAN.
//! 2. Calendar: non-UFN records that ended in an earlier year, and ended
//!    UFN records issued in an earlier year, are purged.
//! 3. Continuity: live records are kept. Per (office, phensig, issue year,
//!    product class) bucket the remaining records shrink to one witness
//!    that proves the highest ETN was used. Tropical phensigs keep one
//!    witness per ETN source; convective watches keep none.
//!
//! Records issued at or after `now` belong to the product being merged and
//! are never reduced, so squeezing a freshly merged set is a no-op.

use crate::config::VtecConfig;
use crate::primitives::{SQUEEZE_GRACE, UFN_STALE_AGE};
use crate::time::year_of;
use crate::vtec::vtec_line;
use crate::{Action, ProductClass, VtecRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// True while a record can still be continued, extended or ended.
#[must_use]
pub fn is_live(record: &VtecRecord, now: i64) -> bool {
    !record.act.is_terminal()
        && (record.ufn || record.end_time.saturating_add(SQUEEZE_GRACE) > now)
}

/// Outcome of a squeeze.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqueezeResult {
    /// Surviving records, in input order.
    pub kept: Vec<VtecRecord>,
    /// Removed records, for auditing.
    pub purged: Vec<VtecRecord>,
    /// Kept records whose content was rewritten (stale UFN → CAN).
    pub modified: Vec<VtecRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Bucket {
    officeid: String,
    phen: String,
    sig: String,
    issue_year: i32,
    product_class: ProductClass,
    national: bool,
}

/// Purges records per the rules above.
#[derive(Debug, Clone, Copy)]
pub struct TableSqueezer<'a> {
    config: &'a VtecConfig,
}

impl<'a> TableSqueezer<'a> {
    #[must_use]
    pub fn new(config: &'a VtecConfig) -> Self {
        Self { config }
    }

    /// Squeeze `records` as of `now`.
    #[must_use]
    pub fn squeeze(&self, records: Vec<VtecRecord>, now: i64) -> SqueezeResult {
        let year = year_of(now);
        let mut result = SqueezeResult::default();

        // Pass 1 + 2
        let mut survivors = Vec::with_capacity(records.len());
        for mut record in records {
            if record.ufn
                && !record.act.is_terminal()
                && now.saturating_sub(record.issue_time) > UFN_STALE_AGE
            {
                record.act = Action::Can;
                record.vtecstr = vtec_line(&record);
                result.modified.push(record.clone());
            }
            let stale_year = if record.ufn {
                record.act.is_terminal() && record.issue_year() < year
            } else {
                year_of(record.end_time) < year
            };
            if stale_year {
                result.purged.push(record);
            } else {
                survivors.push(record);
            }
        }

        // Pass 3: pick one witness per bucket among the non-live records.
        let mut witnesses: BTreeMap<Bucket, usize> = BTreeMap::new();
        for (idx, record) in survivors.iter().enumerate() {
            if is_live(record, now) || record.issue_time >= now {
                continue;
            }
            let Some(bucket) = self.bucket(record) else {
                continue;
            };
            witnesses
                .entry(bucket)
                .and_modify(|best| {
                    let current = &survivors[*best];
                    let better = record.etn > current.etn
                        || (record.etn == current.etn && record.geo_id < current.geo_id);
                    if better {
                        *best = idx;
                    }
                })
                .or_insert(idx);
        }
        let witness_rows: Vec<usize> = witnesses.into_values().collect();

        for (idx, record) in survivors.into_iter().enumerate() {
            if is_live(&record, now) || record.issue_time >= now || witness_rows.contains(&idx) {
                result.kept.push(record);
            } else {
                result.purged.push(record);
            }
        }

        if !result.purged.is_empty() || !result.modified.is_empty() {
            tracing::info!(
                kept = result.kept.len(),
                purged = result.purged.len(),
                modified = result.modified.len(),
                "record table squeezed"
            );
        }
        result
    }

    /// Witness bucket; `None` for phensigs that need no ETN history.
    fn bucket(&self, record: &VtecRecord) -> Option<Bucket> {
        let phensig = record.phensig().ok();
        let hazard = phensig.as_ref().and_then(|ps| self.config.hazard_type(ps));
        if hazard.is_some_and(|h| h.convective_watch || h.routine) || record.act == Action::Rou {
            return None;
        }
        let national = phensig
            .as_ref()
            .is_some_and(|ps| self.config.is_tropical(ps))
            && record.etn >= self.config.tpc_base_etn;
        Some(Bucket {
            officeid: record.officeid.clone(),
            phen: record.phen.clone(),
            sig: record.sig.clone(),
            issue_year: record.issue_year(),
            product_class: record.product_class,
            national,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
