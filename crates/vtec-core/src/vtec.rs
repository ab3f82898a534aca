//! # VTEC String Codec
//!
//! Emit and parse the product VTEC line
//!
//! ```text
//! /K.AAA.OOOO.PH.S.NNNN.YYMMDDTHHMMZ-YYMMDDTHHMMZ/
//! ```
//!
//! and the hydrological H-VTEC line
//!
//! ```text
//! /NNNNN.F.IC.YYMMDDTHHMMZ.YYMMDDTHHMMZ.YYMMDDTHHMMZ.RR/
//! ```
//!
//! `000000T0000Z` stands for an undefined time and maps to `None`.
//! Emitting a parsed string reproduces it byte for byte.

use crate::time::{ZERO_VTEC_TIME, format_vtec_time, parse_vtec_time};
use crate::{Action, FloodRecord, FloodSeverity, HydroVtec, Phensig, ProductClass, VtecError, VtecRecord};
use std::fmt;
use std::str::FromStr;

/// Length of a product VTEC string, slashes included.
pub const VTEC_STRING_LEN: usize = 48;

/// Length of an H-VTEC string, slashes included.
pub const HVTEC_STRING_LEN: usize = 54;

fn render_time(ms: Option<i64>) -> String {
    ms.and_then(|ms| format_vtec_time(ms).ok())
        .unwrap_or_else(|| ZERO_VTEC_TIME.to_string())
}

fn strip_slashes<'a>(s: &'a str, expected_len: usize, what: &str) -> Result<&'a str, VtecError> {
    if s.len() != expected_len {
        return Err(VtecError::Input(format!(
            "{} must be {} characters, got {}: '{}'",
            what,
            expected_len,
            s.len(),
            s
        )));
    }
    s.strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
        .ok_or_else(|| VtecError::Input(format!("{} must be enclosed in slashes: '{}'", what, s)))
}

// =============================================================================
// P-VTEC
// =============================================================================

/// Parsed form of a product VTEC string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtecString {
    pub product_class: ProductClass,
    pub action: Action,
    pub office: String,
    pub phensig: Phensig,
    pub etn: u32,
    /// `None` when the event is already in effect.
    pub begin: Option<i64>,
    /// `None` for until-further-notice events.
    pub end: Option<i64>,
}

impl VtecString {
    /// Build the VTEC line for a record.
    ///
    /// The begin time is zeroed once the event is in effect at issuance,
    /// the end time is zeroed for UFN events, and ROU carries no times.
    pub fn from_record(record: &VtecRecord) -> Result<Self, VtecError> {
        let routine = record.act == Action::Rou;
        let begin = (!routine && record.start_time > record.issue_time).then_some(record.start_time);
        let end = (!routine && !record.ufn).then_some(record.end_time);
        Ok(Self {
            product_class: record.product_class,
            action: record.act,
            office: record.officeid.clone(),
            phensig: record.phensig()?,
            etn: record.etn,
            begin,
            end,
        })
    }
}

impl fmt::Display for VtecString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}.{}.{}.{}.{}.{:04}.{}-{}/",
            self.product_class,
            self.action,
            self.office,
            self.phensig.phen(),
            self.phensig.sig(),
            self.etn,
            render_time(self.begin),
            render_time(self.end)
        )
    }
}

impl FromStr for VtecString {
    type Err = VtecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = strip_slashes(s, VTEC_STRING_LEN, "VTEC string")?;
        let parts: Vec<&str> = inner.split('.').collect();
        let [class, action, office, phen, sig, etn, times] = parts.as_slice() else {
            return Err(VtecError::Input(format!("VTEC string has wrong field count: '{}'", s)));
        };
        let class_char = class
            .chars()
            .next()
            .filter(|_| class.len() == 1)
            .ok_or_else(|| VtecError::Input(format!("bad product class in '{}'", s)))?;
        if office.len() != 4 || etn.len() != 4 || !etn.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VtecError::Input(format!("bad office or ETN field in '{}'", s)));
        }
        let etn: u32 = etn
            .parse()
            .map_err(|_| VtecError::Input(format!("bad ETN in '{}'", s)))?;
        let (begin, end) = times
            .split_once('-')
            .ok_or_else(|| VtecError::Input(format!("bad time range in '{}'", s)))?;
        Ok(Self {
            product_class: ProductClass::from_letter(class_char)?,
            action: action.parse()?,
            office: (*office).to_string(),
            phensig: Phensig::new(phen, sig)?,
            etn,
            begin: parse_vtec_time(begin)?,
            end: parse_vtec_time(end)?,
        })
    }
}

/// Render the VTEC line for a record, falling back to an empty string
/// when the record's phensig is malformed.
#[must_use]
pub fn vtec_line(record: &VtecRecord) -> String {
    VtecString::from_record(record)
        .map(|v| v.to_string())
        .unwrap_or_default()
}

// =============================================================================
// H-VTEC
// =============================================================================

impl fmt::Display for HydroVtec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}.{}.{}.{}.{}.{}.{}/",
            self.point_id,
            self.flood_severity.code(),
            self.immediate_cause,
            render_time(self.rise_above),
            render_time(self.crest),
            render_time(self.fall_below),
            self.flood_record.code()
        )
    }
}

impl FromStr for HydroVtec {
    type Err = VtecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = strip_slashes(s, HVTEC_STRING_LEN, "H-VTEC string")?;
        let parts: Vec<&str> = inner.split('.').collect();
        let [point, severity, cause, rise, crest, fall, record] = parts.as_slice() else {
            return Err(VtecError::Input(format!("H-VTEC string has wrong field count: '{}'", s)));
        };
        let severity = severity
            .chars()
            .next()
            .filter(|_| severity.len() == 1)
            .ok_or_else(|| VtecError::Input(format!("bad flood severity in '{}'", s)))?;
        if point.len() != 5 || cause.len() != 2 {
            return Err(VtecError::Input(format!("bad point id or cause in '{}'", s)));
        }
        Ok(Self {
            point_id: (*point).to_string(),
            flood_severity: FloodSeverity::from_code(severity)?,
            immediate_cause: (*cause).to_string(),
            rise_above: parse_vtec_time(rise)?,
            crest: parse_vtec_time(crest)?,
            fall_below: parse_vtec_time(fall)?,
            flood_record: FloodRecord::from_code(record)?,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
