//! Engine inputs and their validation.

use crate::config::{HazardType, ProductCategory, VtecConfig};
use crate::primitives::{MAX_EVENTS_PER_INVOCATION, MAX_ZONES_PER_EVENT};
use crate::{GeoType, HazardEvent, HazardStatus, Phensig, PolicyWarning, ProductClass, VtecError, VtecRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Key into the product category table, e.g. `WSW`.
    pub product_category: String,
    #[serde(rename = "siteID4")]
    pub site_id4: String,
    #[serde(default)]
    pub vtec_mode: ProductClass,
    #[serde(default)]
    pub events: Vec<HazardEvent>,
    pub creation_time: i64,
    /// Restricts coverage and omission handling to these zones.
    #[serde(default)]
    pub limit_geo_zones: Option<BTreeSet<String>>,
}

/// The engine's answer: analyzed records plus per-event problems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub analyzed: Vec<VtecRecord>,
    pub warnings: Vec<PolicyWarning>,
}

/// A validated event with its resolved tables.
#[derive(Debug, Clone)]
pub(crate) struct CheckedEvent<'a> {
    pub event: &'a HazardEvent,
    /// Position in the request; segments number from one.
    pub index: usize,
    pub phensig: Phensig,
    pub hazard: &'a HazardType,
    /// Deduplicated, sorted.
    pub zones: Vec<String>,
}

impl CheckedEvent<'_> {
    pub fn seg(&self) -> u32 {
        (self.index + 1) as u32
    }

    /// True when the proposal's end has already arrived.
    pub fn over_by(&self, time: i64) -> bool {
        !self.event.ufn && self.event.end_time <= time
    }
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct CheckedRequest<'a> {
    pub category: &'a ProductCategory,
    pub events: Vec<CheckedEvent<'a>>,
    /// All events share one discipline; an empty request counts as combinable.
    pub combinable: bool,
}

impl AnalysisRequest {
    /// Validate against the configuration tables.
    pub(crate) fn check<'a>(&'a self, config: &'a VtecConfig) -> Result<CheckedRequest<'a>, VtecError> {
        if self.site_id4.len() != 4 || !self.site_id4.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(VtecError::Input(format!("site id '{}' must be four characters", self.site_id4)));
        }
        let category = config.category(&self.product_category)?;
        if self.events.len() > MAX_EVENTS_PER_INVOCATION {
            return Err(VtecError::Input(format!(
                "{} events exceed the limit of {}",
                self.events.len(),
                MAX_EVENTS_PER_INVOCATION
            )));
        }

        let mut events = Vec::with_capacity(self.events.len());
        let mut discipline: Option<(bool, GeoType)> = None;
        for (index, event) in self.events.iter().enumerate() {
            if !matches!(event.status, HazardStatus::Issued | HazardStatus::Ended) {
                return Err(VtecError::Input(format!(
                    "event {} has status '{}'; only issued and ended are accepted",
                    event.event_id, event.status
                )));
            }
            let phensig = event
                .phensig()
                .map_err(|e| VtecError::Input(format!("event {}: {}", event.event_id, e)))?;
            let hazard = config.hazard_type(&phensig).ok_or_else(|| {
                VtecError::Input(format!("event {}: unknown phensig {}", event.event_id, phensig))
            })?;
            if !category.allowed_hazards.contains(&phensig) {
                return Err(VtecError::Lookup {
                    category: self.product_category.clone(),
                    phensig: phensig.to_string(),
                });
            }
            if event.zones.is_empty() || event.zones.len() > MAX_ZONES_PER_EVENT {
                return Err(VtecError::Input(format!(
                    "event {} must cover between 1 and {} zones",
                    event.event_id, MAX_ZONES_PER_EVENT
                )));
            }
            if event.zones.iter().any(|z| z.trim().is_empty()) {
                return Err(VtecError::Input(format!("event {} has a blank zone", event.event_id)));
            }
            if !event.ufn && event.start_time >= event.end_time && !hazard.routine {
                return Err(VtecError::Input(format!(
                    "event {} must start before it ends",
                    event.event_id
                )));
            }
            let this = (hazard.combinable_segments, event.geo_type);
            match discipline {
                None => discipline = Some(this),
                Some(first) if first != this => {
                    return Err(VtecError::Input(
                        "all events in one invocation must share combinability and geometry type"
                            .to_string(),
                    ));
                }
                Some(_) => {}
            }
            let zones: BTreeSet<String> = event.zones.iter().cloned().collect();
            events.push(CheckedEvent {
                event,
                index,
                phensig,
                hazard,
                zones: zones.into_iter().collect(),
            });
        }

        Ok(CheckedRequest {
            category,
            events,
            combinable: discipline.is_none_or(|(combinable, _)| combinable),
        })
    }

    /// True when `geo_id` is inside the optional zone limit.
    #[must_use]
    pub fn in_scope(&self, geo_id: &str) -> bool {
        self.limit_geo_zones.as_ref().is_none_or(|zones| zones.contains(geo_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(phensig: &str, status: HazardStatus) -> HazardEvent {
        let (phen, sig) = phensig.split_once('.').expect("phensig");
        HazardEvent {
            event_id: "HZ-1".to_string(),
            phen: phen.to_string(),
            sig: sig.to_string(),
            geo_type: GeoType::Area,
            zones: vec!["FLZ051".to_string(), "FLZ050".to_string(), "FLZ050".to_string()],
            start_time: 0,
            end_time: 1000,
            ufn: false,
            status,
            etn: None,
            hvtec: None,
            correction: false,
        }
    }

    fn request(events: Vec<HazardEvent>) -> AnalysisRequest {
        AnalysisRequest {
            product_category: "WSW".to_string(),
            site_id4: "KTBW".to_string(),
            vtec_mode: ProductClass::Operational,
            events,
            creation_time: 0,
            limit_geo_zones: None,
        }
    }

    #[test]
    fn accepts_and_normalizes_zones() {
        let config = VtecConfig::builtin();
        let req = request(vec![event("WS.W", HazardStatus::Issued)]);
        let checked = req.check(&config).expect("valid");
        assert!(checked.combinable);
        assert_eq!(checked.events[0].zones, vec!["FLZ050", "FLZ051"]);
        assert_eq!(checked.events[0].seg(), 1);
    }

    #[test]
    fn rejects_editor_only_status() {
        let config = VtecConfig::builtin();
        let req = request(vec![event("WS.W", HazardStatus::Proposed)]);
        assert!(matches!(req.check(&config), Err(VtecError::Input(_))));
    }

    #[test]
    fn rejects_phensig_outside_category() {
        let config = VtecConfig::builtin();
        let req = request(vec![event("HW.W", HazardStatus::Issued)]);
        assert!(matches!(req.check(&config), Err(VtecError::Lookup { .. })));
    }

    #[test]
    fn rejects_unknown_phensig() {
        let config = VtecConfig::builtin();
        let req = request(vec![event("ZZ.W", HazardStatus::Issued)]);
        assert!(matches!(req.check(&config), Err(VtecError::Input(_))));
    }

    #[test]
    fn rejects_mixed_discipline() {
        let config = VtecConfig::builtin();
        let mut req = request(vec![
            event("FA.Y", HazardStatus::Issued),
            event("HY.S", HazardStatus::Issued),
        ]);
        req.product_category = "FLS".to_string();
        assert!(req.check(&config).is_ok());

        let mut point = event("FL.Y", HazardStatus::Issued);
        point.geo_type = GeoType::Point;
        req.events.push(point);
        assert!(matches!(req.check(&config), Err(VtecError::Input(_))));
    }

    #[test]
    fn rejects_inverted_times_and_bad_site() {
        let config = VtecConfig::builtin();
        let mut e = event("WS.W", HazardStatus::Issued);
        e.end_time = e.start_time;
        assert!(request(vec![e]).check(&config).is_err());

        let mut req = request(vec![]);
        req.site_id4 = "TBW".to_string();
        assert!(req.check(&config).is_err());
    }

    #[test]
    fn empty_request_is_combinable() {
        let config = VtecConfig::builtin();
        let req = request(vec![]);
        assert!(req.check(&config).expect("valid").combinable);
    }
}
