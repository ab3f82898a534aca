//! Proposed hazard events: the engine's input.

use super::{HydroVtec, Phensig, VtecError};
use crate::primitives::UFN_END_TIME;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle label of a proposed hazard event.
///
/// Only `Issued` and `Ended` may reach the engine; the others belong to
/// the upstream editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardStatus {
    Pending,
    Proposed,
    Issued,
    Ended,
    Elapsed,
}

impl fmt::Display for HazardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Proposed => "proposed",
            Self::Issued => "issued",
            Self::Ended => "ended",
            Self::Elapsed => "elapsed",
        };
        f.write_str(s)
    }
}

/// Geometry kind of an event's footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeoType {
    #[default]
    Area,
    Point,
    Line,
}

/// A hazard event proposed by an upstream editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardEvent {
    #[serde(rename = "eventID")]
    pub event_id: String,
    pub phen: String,
    pub sig: String,
    #[serde(default)]
    pub geo_type: GeoType,
    /// Zones the event covers.
    pub zones: Vec<String>,
    pub start_time: i64,
    /// Ignored when `ufn` is set.
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub ufn: bool,
    pub status: HazardStatus,
    /// ETN of an already issued event (or the national-center ETN).
    #[serde(default)]
    pub etn: Option<u32>,
    #[serde(default)]
    pub hvtec: Option<HydroVtec>,
    /// Reissue the event's last action as a correction.
    #[serde(default)]
    pub correction: bool,
}

impl HazardEvent {
    /// The event's phensig.
    pub fn phensig(&self) -> Result<Phensig, VtecError> {
        Phensig::new(&self.phen, &self.sig)
    }

    /// Effective end time, honoring UFN.
    #[must_use]
    pub fn effective_end(&self) -> i64 {
        if self.ufn { UFN_END_TIME } else { self.end_time }
    }
}
