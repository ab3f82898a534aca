//! # VTEC Engine
//!
//! Computes the analyzed records that, once merged, make the record store
//! reflect a set of proposed hazards. The engine is a pure function of its
//! inputs: configuration, request and a snapshot of current records. It
//! never touches a store.
//!
//! ## Processing order
//!
//! 1. Events carrying an ETN, then the rest, in request order. Each event
//!    claims the records it continues; a claimed record cannot be matched
//!    again in the same invocation.
//! 2. Upgrades and downgrades triggered by the NEW records.
//! 3. Omission: in a combinable invocation every unclaimed live record of
//!    a combinable phensig in the category is cancelled (or expired).
//!
//! ## Output order
//!
//! Modifications (CON, EXT, EXA, EXB, COR, ROU), then endings (CAN, UPG,
//! EXP), then NEW; within each group by phen, sig, ETN and zone.

mod request;

pub use request::{AnalysisOutcome, AnalysisRequest};

use crate::config::{ProductCategory, VtecConfig};
use crate::etn::{EtnAllocator, NationalEtnSource, StaticNationalEtns};
use crate::primitives::{MS_PER_HOUR, UFN_END_TIME};
use crate::squeeze::is_live;
use crate::time::year_of;
use crate::vtec::vtec_line;
use crate::{Action, HazardEvent, HazardStatus, PolicyWarning, ProductClass, VtecError, VtecRecord};
use request::{CheckedEvent, CheckedRequest};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ENGINE
// =============================================================================

/// The VTEC engine: configuration plus the national ETN feed.
pub struct VtecEngine<'a> {
    config: &'a VtecConfig,
    national: Box<dyn NationalEtnSource + 'a>,
}

impl std::fmt::Debug for VtecEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VtecEngine").finish_non_exhaustive()
    }
}

impl<'a> VtecEngine<'a> {
    /// Engine using the configuration's static national ETN table.
    #[must_use]
    pub fn new(config: &'a VtecConfig) -> Self {
        Self {
            config,
            national: Box::new(StaticNationalEtns::from_config(config)),
        }
    }

    /// Replace the national ETN feed.
    #[must_use]
    pub fn with_national_source(mut self, source: impl NationalEtnSource + 'a) -> Self {
        self.national = Box::new(source);
        self
    }

    #[must_use]
    pub fn config(&self) -> &'a VtecConfig {
        self.config
    }

    /// Analyze `request` against the current `records`.
    pub fn analyze(
        &self,
        request: &AnalysisRequest,
        records: &[VtecRecord],
    ) -> Result<AnalysisOutcome, VtecError> {
        let checked = request.check(self.config)?;
        let mut analysis = Analysis::new(self, request, &checked, records);

        let (with_etn, without_etn): (Vec<&CheckedEvent<'_>>, Vec<&CheckedEvent<'_>>) =
            checked.events.iter().partition(|ev| ev.event.etn.is_some());
        for ev in with_etn.into_iter().chain(without_etn) {
            analysis.process(ev)?;
        }
        analysis.apply_upgrades();
        if checked.combinable {
            analysis.cancel_omitted(&checked);
        }
        let outcome = analysis.finish();

        tracing::info!(
            category = %request.product_category,
            site = %request.site_id4,
            mode = %request.vtec_mode,
            events = request.events.len(),
            analyzed = outcome.analyzed.len(),
            warnings = outcome.warnings.len(),
            "hazards analyzed"
        );
        Ok(outcome)
    }
}

// =============================================================================
// ANALYSIS STATE
// =============================================================================

/// An analyzed record before the common fields are filled in.
#[derive(Debug)]
struct Pending {
    record: VtecRecord,
    seg: u32,
}

struct Analysis<'e, 'a> {
    engine: &'e VtecEngine<'a>,
    request: &'e AnalysisRequest,
    category: &'e ProductCategory,
    creation: i64,
    /// Records of this office and mode inside the zone limit.
    coverage: Vec<&'e VtecRecord>,
    /// Output row produced for each coverage row, if claimed.
    claims: BTreeMap<usize, usize>,
    allocator: EtnAllocator,
    outputs: Vec<Pending>,
    warnings: Vec<PolicyWarning>,
}

impl<'e, 'a> Analysis<'e, 'a> {
    fn new(
        engine: &'e VtecEngine<'a>,
        request: &'e AnalysisRequest,
        checked: &CheckedRequest<'e>,
        records: &'e [VtecRecord],
    ) -> Self {
        let site = request.site_id4.as_str();
        let coverage = records
            .iter()
            .filter(|r| {
                r.officeid == site
                    && r.product_class == request.vtec_mode
                    && request.in_scope(&r.geo_id)
            })
            .collect();
        // Operational numbering ignores test records; test numbering sees everything.
        let numbering = records.iter().filter(|r| {
            request.vtec_mode != ProductClass::Operational || r.product_class.is_operational()
        });
        let allocator = EtnAllocator::from_records(numbering, site, year_of(request.creation_time));
        Self {
            engine,
            request,
            category: checked.category,
            creation: request.creation_time,
            coverage,
            claims: BTreeMap::new(),
            allocator,
            outputs: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn config(&self) -> &'e VtecConfig {
        self.engine.config
    }

    fn claimed(&self, idx: usize) -> bool {
        self.claims.contains_key(&idx)
    }

    // -------------------------------------------------------------------------
    // Per-event processing
    // -------------------------------------------------------------------------

    fn process(&mut self, ev: &CheckedEvent<'_>) -> Result<(), VtecError> {
        if ev.event.correction {
            self.correct(ev);
            return Ok(());
        }
        if ev.hazard.routine {
            let event = ev.event;
            for zone in &ev.zones {
                self.emit_zone(ev, zone, Action::Rou, 0, (event.start_time, event.end_time, event.ufn));
            }
            return Ok(());
        }

        let matches = self.find_matches(ev);
        if ev.event.status == HazardStatus::Ended || ev.over_by(self.creation) {
            self.end_event(ev, &matches);
            return Ok(());
        }
        if matches.is_empty() {
            return self.issue_new(ev);
        }
        if matches.iter().all(|&i| self.coverage[i].has_ended_by(self.creation)) {
            // Too late to continue: close the old event and start over.
            for &i in &matches {
                self.emit_from(i, Action::Exp, Some(ev));
            }
            return self.issue_new(ev);
        }
        self.continue_event(ev, &matches);
        Ok(())
    }

    /// Coverage rows the event continues.
    ///
    /// With an ETN: every live unclaimed row of that ETN. Without: the most
    /// recently issued live row on one of the event's zones whose time range
    /// meets the event's, widened to every row sharing its ETN.
    fn find_matches(&self, ev: &CheckedEvent<'_>) -> Vec<usize> {
        let candidate = |i: usize, r: &VtecRecord| {
            !self.claimed(i) && r.is(&ev.phensig) && is_live(r, self.creation)
        };
        let etn = ev.event.etn.or_else(|| {
            self.coverage
                .iter()
                .enumerate()
                .filter(|&(i, r)| {
                    candidate(i, r)
                        && ev.zones.binary_search(&r.geo_id).is_ok()
                        && r.start_time <= ev.event.effective_end()
                        && ev.event.start_time <= r.effective_end()
                })
                .max_by(|(_, a), (_, b)| a.issue_time.cmp(&b.issue_time).then(a.etn.cmp(&b.etn)))
                .map(|(_, r)| r.etn)
        });
        let Some(etn) = etn else {
            return Vec::new();
        };
        self.coverage
            .iter()
            .enumerate()
            .filter(|&(i, r)| candidate(i, r) && r.etn == etn)
            .map(|(i, _)| i)
            .collect()
    }

    /// Start, end and UFN flag the event asks for on a zone.
    ///
    /// A zone already in effect keeps its start.
    fn proposed_times(&self, ev: &CheckedEvent<'_>, existing: Option<&VtecRecord>) -> (i64, i64, bool) {
        let start = match existing {
            Some(r) if r.start_time <= self.creation => r.start_time,
            _ => ev.event.start_time.max(self.creation),
        };
        (start, ev.event.effective_end(), ev.event.ufn)
    }

    fn same_times(record: &VtecRecord, times: (i64, i64, bool)) -> bool {
        let (start, end, ufn) = times;
        record.start_time == start && record.ufn == ufn && (ufn || record.end_time == end)
    }

    /// Ended, or close enough to its end that ending it now is an expiry.
    ///
    /// A record inside the grace window still cancels when another issued
    /// event of the same phensig takes over the zone in this invocation.
    fn expiring(&self, record: &VtecRecord, grace: i64, source: Option<&HazardEvent>) -> bool {
        if record.has_ended_by(self.creation) {
            return true;
        }
        let near_end = !record.ufn && self.creation >= record.end_time.saturating_sub(grace);
        near_end && !self.replaced(record, source)
    }

    fn replaced(&self, record: &VtecRecord, source: Option<&HazardEvent>) -> bool {
        self.request.events.iter().any(|e| {
            !source.is_some_and(|s| std::ptr::eq(s, e))
                && e.status == HazardStatus::Issued
                && !e.correction
                && e.phen == record.phen
                && e.sig == record.sig
                && e.zones.contains(&record.geo_id)
                && e.effective_end() > self.creation
        })
    }

    fn end_event(&mut self, ev: &CheckedEvent<'_>, matches: &[usize]) {
        if matches.is_empty() {
            let warning = if ev.event.status == HazardStatus::Ended {
                PolicyWarning::EndedWithoutRecord {
                    event_id: ev.event.event_id.clone(),
                    phensig: ev.phensig.to_string(),
                }
            } else {
                PolicyWarning::ExpiredBeforeIssuance {
                    event_id: ev.event.event_id.clone(),
                    phensig: ev.phensig.to_string(),
                }
            };
            tracing::warn!(%warning, "event dropped");
            self.warnings.push(warning);
            return;
        }
        let grace = ev.hazard.expiration_grace();
        for &i in matches {
            let act = if self.expiring(self.coverage[i], grace, Some(ev.event)) {
                Action::Exp
            } else {
                Action::Can
            };
            self.emit_from(i, act, Some(ev));
        }
    }

    fn continue_event(&mut self, ev: &CheckedEvent<'_>, matches: &[usize]) {
        let grace = ev.hazard.expiration_grace();
        let etn = self.coverage[matches[0]].etn;
        let mut kept_zones = BTreeSet::new();
        let mut any_ext = false;
        let mut live_kept = false;
        let mut reference: Option<usize> = None;

        for &i in matches {
            let record = self.coverage[i];
            let ended = record.has_ended_by(self.creation);
            if ev.zones.binary_search(&record.geo_id).is_err() {
                if !ended {
                    reference.get_or_insert(i);
                }
                let act = if self.expiring(record, grace, Some(ev.event)) {
                    Action::Exp
                } else {
                    Action::Can
                };
                self.emit_from(i, act, Some(ev));
                continue;
            }
            kept_zones.insert(record.geo_id.clone());
            if ended {
                self.emit_from(i, Action::Exp, Some(ev));
                continue;
            }
            reference.get_or_insert(i);
            let times = self.proposed_times(ev, Some(record));
            if Self::same_times(record, times) {
                if self.expiring(record, grace, Some(ev.event)) {
                    self.emit_from(i, Action::Exp, Some(ev));
                } else {
                    self.emit_from(i, Action::Con, Some(ev));
                    live_kept = true;
                }
            } else {
                let row = self.emit_from(i, Action::Ext, Some(ev));
                self.set_times(row, times);
                any_ext = true;
                live_kept = true;
            }
        }

        let added: Vec<&String> = ev.zones.iter().filter(|z| !kept_zones.contains(*z)).collect();
        if added.is_empty() {
            return;
        }
        let act = if any_ext {
            Action::Exb
        } else if live_kept {
            Action::Exa
        } else {
            match reference {
                Some(i) => {
                    let record = self.coverage[i];
                    if Self::same_times(record, self.proposed_times(ev, Some(record))) {
                        Action::Exa
                    } else {
                        Action::Exb
                    }
                }
                None => Action::Exa,
            }
        };
        let times = self.proposed_times(ev, None);
        for zone in added {
            self.emit_zone(ev, zone, act, etn, times);
        }
    }

    fn issue_new(&mut self, ev: &CheckedEvent<'_>) -> Result<(), VtecError> {
        if ev.over_by(self.creation) {
            let warning = PolicyWarning::ExpiredBeforeIssuance {
                event_id: ev.event.event_id.clone(),
                phensig: ev.phensig.to_string(),
            };
            tracing::warn!(%warning, "event dropped");
            self.warnings.push(warning);
            return Ok(());
        }
        let etn = self.new_etn(ev)?;
        let times = self.proposed_times(ev, None);
        for zone in &ev.zones {
            self.emit_zone(ev, zone, Action::New, etn, times);
        }
        tracing::debug!(phensig = %ev.phensig, etn, zones = ev.zones.len(), "new event");
        Ok(())
    }

    fn new_etn(&mut self, ev: &CheckedEvent<'_>) -> Result<u32, VtecError> {
        let config = self.config();
        let site = self.request.site_id4.as_str();
        let floor = ev.hazard.etn_floor.unwrap_or(1);
        let tropical = config.is_tropical(&ev.phensig);

        if tropical && config.self_assigns_tropical(site) {
            return self.allocator.allocate(&ev.phensig, floor, Some(config.tpc_base_etn));
        }
        if tropical || ev.hazard.convective_watch {
            let national = match ev.event.etn {
                Some(etn) => Some(etn),
                None => self.engine.national.national_etn(
                    ev.event,
                    &ev.phensig,
                    year_of(self.creation),
                )?,
            };
            match national {
                Some(etn) => {
                    self.allocator.reserve(&ev.phensig, etn);
                    return Ok(etn);
                }
                None if tropical => {
                    return Err(VtecError::Input(format!(
                        "event {}: no national ETN available for {}",
                        ev.event.event_id, ev.phensig
                    )));
                }
                None => {}
            }
        }
        self.allocator.allocate(&ev.phensig, floor, None)
    }

    fn correct(&mut self, ev: &CheckedEvent<'_>) {
        for zone in &ev.zones {
            let prior = ev.event.etn.and_then(|etn| {
                self.coverage
                    .iter()
                    .enumerate()
                    .filter(|&(i, r)| {
                        !self.claimed(i) && r.is(&ev.phensig) && r.geo_id == *zone && r.etn == etn
                    })
                    .max_by_key(|(_, r)| r.issue_time)
                    .map(|(i, _)| i)
            });
            match prior {
                Some(i) => {
                    self.emit_from(i, Action::Cor, Some(ev));
                }
                None => {
                    let warning = PolicyWarning::CorrectionWithoutPrior {
                        event_id: ev.event.event_id.clone(),
                        phensig: ev.phensig.to_string(),
                        geo_id: zone.clone(),
                        etn: ev.event.etn,
                    };
                    tracing::warn!(%warning, "correction dropped");
                    self.warnings.push(warning);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Cross-event passes
    // -------------------------------------------------------------------------

    /// Replace weaker or stronger hazards overlapped by each NEW record.
    fn apply_upgrades(&mut self) {
        let config = self.config();
        let new_rows: Vec<usize> = (0..self.outputs.len())
            .filter(|&o| self.outputs[o].record.act == Action::New)
            .collect();
        for o in new_rows {
            let (new_ps, geo_id, start, end, seg) = {
                let pending = &self.outputs[o];
                let Ok(ps) = pending.record.phensig() else {
                    continue;
                };
                (
                    ps,
                    pending.record.geo_id.clone(),
                    pending.record.start_time,
                    pending.record.effective_end(),
                    pending.seg,
                )
            };
            for i in 0..self.coverage.len() {
                let old = self.coverage[i];
                if old.geo_id != geo_id
                    || old.is(&new_ps)
                    || !is_live(old, self.creation)
                    || old.has_ended_by(self.creation)
                    || !(old.start_time < end && start < old.effective_end())
                {
                    continue;
                }
                let Ok(old_ps) = old.phensig() else {
                    continue;
                };
                let existing = self.claims.get(&i).copied();
                if existing.is_some_and(|row| self.outputs[row].record.act != Action::Can) {
                    continue;
                }
                let act = if config.is_upgrade(&new_ps, &old_ps) {
                    Action::Upg
                } else if config.is_downgrade(&new_ps, &old_ps) {
                    Action::Can
                } else {
                    continue;
                };
                match existing {
                    Some(row) => {
                        self.outputs[row].record.act = act;
                        self.outputs[row].seg = seg;
                    }
                    None => {
                        let row = self.emit_from(i, act, None);
                        self.outputs[row].seg = seg;
                    }
                }
                tracing::debug!(from = %old_ps, to = %new_ps, geo_id = %geo_id, ?act, "replaced by new hazard");
            }
        }
    }

    /// Cancel live combinable hazards the invocation left out.
    fn cancel_omitted(&mut self, checked: &CheckedRequest<'_>) {
        let config = self.config();
        for i in 0..self.coverage.len() {
            let record = self.coverage[i];
            if self.claimed(i) || !is_live(record, self.creation) {
                continue;
            }
            let Ok(ps) = record.phensig() else {
                continue;
            };
            if !checked.category.allowed_hazards.contains(&ps) {
                continue;
            }
            let Some(hazard) = config.hazard_type(&ps) else {
                continue;
            };
            if !hazard.combinable_segments || hazard.routine {
                continue;
            }
            let act = if self.expiring(record, hazard.expiration_grace(), None) {
                Action::Exp
            } else {
                Action::Can
            };
            self.emit_from(i, act, None);
        }
    }

    // -------------------------------------------------------------------------
    // Output construction
    // -------------------------------------------------------------------------

    /// Copy a coverage row into the output with a new action; claims the row.
    fn emit_from(&mut self, idx: usize, act: Action, ev: Option<&CheckedEvent<'_>>) -> usize {
        let mut record = self.coverage[idx].clone();
        record.act = act;
        let mut seg = 0;
        if let Some(ev) = ev {
            seg = ev.seg();
            record.event_id = Some(ev.event.event_id.clone());
            if ev.event.hvtec.is_some() {
                record.hvtec = ev.event.hvtec.clone();
            }
        }
        self.outputs.push(Pending { record, seg });
        let row = self.outputs.len() - 1;
        self.claims.insert(idx, row);
        row
    }

    fn set_times(&mut self, row: usize, (start, end, ufn): (i64, i64, bool)) {
        let record = &mut self.outputs[row].record;
        record.start_time = start;
        record.end_time = end;
        record.ufn = ufn;
    }

    fn emit_zone(
        &mut self,
        ev: &CheckedEvent<'_>,
        zone: &str,
        act: Action,
        etn: u32,
        (start, end, ufn): (i64, i64, bool),
    ) {
        let event = ev.event;
        let record = VtecRecord {
            geo_id: zone.to_string(),
            officeid: self.request.site_id4.clone(),
            phen: ev.phensig.phen().to_string(),
            sig: ev.phensig.sig().to_string(),
            etn,
            act,
            start_time: start,
            end_time: end,
            issue_time: self.creation,
            purge_time: self.creation,
            ufn,
            seg: ev.seg(),
            pil: String::new(),
            event_id: Some(event.event_id.clone()),
            hdln: String::new(),
            vtecstr: String::new(),
            product_class: self.request.vtec_mode,
            hvtec: event.hvtec.clone(),
        };
        self.outputs.push(Pending {
            record,
            seg: ev.seg(),
        });
    }

    /// Fill the fields every analyzed record shares and sort.
    fn finish(self) -> AnalysisOutcome {
        let config = self.config();
        let purge = self.creation.saturating_add(self.category.purge_hours.saturating_mul(MS_PER_HOUR));
        let mut analyzed: Vec<VtecRecord> = self
            .outputs
            .into_iter()
            .map(|Pending { mut record, seg }| {
                record.issue_time = self.creation;
                record.purge_time = purge;
                record.seg = seg;
                record.pil = self.category.pil.clone();
                record.product_class = self.request.vtec_mode;
                if record.ufn {
                    record.end_time = UFN_END_TIME;
                }
                if let Some(hazard) = record.phensig().ok().and_then(|ps| config.hazard_type(&ps)) {
                    record.hdln = hazard.headline.clone();
                }
                record.vtecstr = vtec_line(&record);
                record
            })
            .collect();
        analyzed.sort_by(|a, b| {
            action_group(a.act)
                .cmp(&action_group(b.act))
                .then_with(|| a.phen.cmp(&b.phen))
                .then_with(|| a.sig.cmp(&b.sig))
                .then_with(|| a.etn.cmp(&b.etn))
                .then_with(|| a.geo_id.cmp(&b.geo_id))
        });
        AnalysisOutcome {
            analyzed,
            warnings: self.warnings,
        }
    }
}

/// Merge order group of an action.
fn action_group(act: Action) -> u8 {
    match act {
        Action::Con | Action::Ext | Action::Exa | Action::Exb | Action::Cor | Action::Rou => 0,
        Action::Can | Action::Upg | Action::Exp => 1,
        Action::New => 2,
    }
}

// =============================================================================
// TESTS
// =============================================================================
