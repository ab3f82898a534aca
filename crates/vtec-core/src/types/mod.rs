//! # Core Type Definitions
//!
//! This module contains all core types for the VTEC engine:
//! - Phenomenon/significance pairs (`Phensig`)
//! - Action codes and product classes (`Action`, `ProductClass`)
//! - Persisted records (`VtecRecord`, `HydroVtec`)
//! - Engine input (`HazardEvent`, `HazardStatus`, `GeoType`)
//! - Error and warning types (`VtecError`, `PolicyWarning`)
//!
//! ## Determinism Guarantees
//!
//! All identifier types implement `Ord` so they can key `BTreeMap`/`BTreeSet`.
//! Times are integer milliseconds; there is no floating-point anywhere.

mod event;
mod record;

pub use event::{GeoType, HazardEvent, HazardStatus};
pub use record::{FloodRecord, FloodSeverity, HydroVtec, RecordKey, VtecRecord};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// PHENSIG
// =============================================================================

/// A phenomenon + significance pair, written `PH.S` (e.g. `FF.W`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Phensig {
    phen: String,
    sig: String,
}

impl Phensig {
    /// Create a phensig, validating the two-character phenomenon and
    /// one-character significance.
    pub fn new(phen: &str, sig: &str) -> Result<Self, VtecError> {
        let valid_phen = phen.len() == 2 && phen.chars().all(|c| c.is_ascii_alphanumeric());
        let valid_sig = sig.len() == 1 && sig.chars().all(|c| c.is_ascii_alphabetic());
        if !valid_phen || !valid_sig {
            return Err(VtecError::Input(format!("malformed phensig '{}.{}'", phen, sig)));
        }
        Ok(Self {
            phen: phen.to_ascii_uppercase(),
            sig: sig.to_ascii_uppercase(),
        })
    }

    /// The two-character phenomenon.
    #[must_use]
    pub fn phen(&self) -> &str {
        &self.phen
    }

    /// The one-character significance.
    #[must_use]
    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// True when the pair matches the given phen/sig strings.
    #[must_use]
    pub fn matches(&self, phen: &str, sig: &str) -> bool {
        self.phen == phen && self.sig == sig
    }
}

impl fmt::Display for Phensig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.phen, self.sig)
    }
}

impl FromStr for Phensig {
    type Err = VtecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (phen, sig) = s
            .split_once('.')
            .ok_or_else(|| VtecError::Input(format!("malformed phensig '{}'", s)))?;
        Self::new(phen, sig)
    }
}

impl TryFrom<String> for Phensig {
    type Error = VtecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Phensig> for String {
    fn from(value: Phensig) -> Self {
        value.to_string()
    }
}

// =============================================================================
// ACTION CODES
// =============================================================================

/// VTEC action code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    New,
    Con,
    Ext,
    Exa,
    Exb,
    Exp,
    Can,
    Upg,
    Cor,
    Rou,
}

impl Action {
    /// All action codes in declaration order.
    pub const ALL: [Self; 10] = [
        Self::New,
        Self::Con,
        Self::Ext,
        Self::Exa,
        Self::Exb,
        Self::Exp,
        Self::Can,
        Self::Upg,
        Self::Cor,
        Self::Rou,
    ];

    /// The three-letter code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Con => "CON",
            Self::Ext => "EXT",
            Self::Exa => "EXA",
            Self::Exb => "EXB",
            Self::Exp => "EXP",
            Self::Can => "CAN",
            Self::Upg => "UPG",
            Self::Cor => "COR",
            Self::Rou => "ROU",
        }
    }

    /// CAN, UPG and EXP end an event; nothing may continue its ETN afterwards.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Can | Self::Upg | Self::Exp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Action {
    type Err = VtecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.code() == s)
            .ok_or_else(|| VtecError::Input(format!("unknown action code '{}'", s)))
    }
}

// =============================================================================
// PRODUCT CLASS (VTEC MODE)
// =============================================================================

/// The VTEC product class letter, which doubles as the engine's mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ProductClass {
    /// Operational.
    #[default]
    #[serde(rename = "O")]
    Operational,
    /// Test.
    #[serde(rename = "T")]
    Test,
    /// Experimental.
    #[serde(rename = "E")]
    Experimental,
    /// Experimental VTEC in an operational product.
    #[serde(rename = "X")]
    ExperimentalInOperational,
}

impl ProductClass {
    /// The single-letter code.
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Operational => 'O',
            Self::Test => 'T',
            Self::Experimental => 'E',
            Self::ExperimentalInOperational => 'X',
        }
    }

    /// Parse the single-letter code.
    pub fn from_letter(c: char) -> Result<Self, VtecError> {
        match c {
            'O' => Ok(Self::Operational),
            'T' => Ok(Self::Test),
            'E' => Ok(Self::Experimental),
            'X' => Ok(Self::ExperimentalInOperational),
            other => Err(VtecError::Input(format!("unknown product class '{}'", other))),
        }
    }

    #[must_use]
    pub const fn is_operational(self) -> bool {
        matches!(self, Self::Operational)
    }
}

impl fmt::Display for ProductClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for ProductClass {
    type Err = VtecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_letter(c.to_ascii_uppercase()),
            _ => Err(VtecError::Input(format!("unknown product class '{}'", s))),
        }
    }
}

// =============================================================================
// POLICY WARNINGS
// =============================================================================

/// A per-event problem that drops the offending record but lets the
/// rest of the invocation proceed.
///
/// Warnings are returned alongside results so an operator can review them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyWarning {
    /// A correction was requested but no prior record matches it.
    CorrectionWithoutPrior {
        event_id: String,
        phensig: String,
        geo_id: String,
        etn: Option<u32>,
    },
    /// A COR record reached the ingester without a stored record to correct.
    CorrectionUnmatched { record: Box<VtecRecord> },
    /// An `ended` event has no active record to cancel.
    EndedWithoutRecord { event_id: String, phensig: String },
    /// An `issued` event that is not in the store already ended before issuance.
    ExpiredBeforeIssuance { event_id: String, phensig: String },
    /// A statewide (`000`) record matched no concrete zone.
    UnexpandedStatewide {
        phensig: String,
        geo_id: String,
        etn: u32,
    },
}

impl fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorrectionWithoutPrior {
                event_id,
                phensig,
                geo_id,
                etn,
            } => match etn {
                Some(etn) => write!(
                    f,
                    "COR for event {} ({} {:04} on {}) has no prior record; dropped",
                    event_id, phensig, etn, geo_id
                ),
                None => write!(
                    f,
                    "COR for event {} ({} on {}) carries no ETN; dropped",
                    event_id, phensig, geo_id
                ),
            },
            Self::CorrectionUnmatched { record } => write!(
                f,
                "COR {}.{} {:04} on {} matched no stored record; dropped",
                record.phen, record.sig, record.etn, record.geo_id
            ),
            Self::EndedWithoutRecord { event_id, phensig } => write!(
                f,
                "ended event {} ({}) has no active record; nothing to cancel",
                event_id, phensig
            ),
            Self::ExpiredBeforeIssuance { event_id, phensig } => write!(
                f,
                "event {} ({}) ended before issuance; not issued",
                event_id, phensig
            ),
            Self::UnexpandedStatewide {
                phensig,
                geo_id,
                etn,
            } => write!(
                f,
                "statewide record {} {:04} on {} matched no zones; dropped",
                phensig, etn, geo_id
            ),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that fail a whole engine or merge invocation.
///
/// - No silent failures
/// - No partial store writes: an error means nothing was written
/// - Per-event problems are [`PolicyWarning`]s, not errors
#[derive(Debug, Error)]
pub enum VtecError {
    /// Malformed hazard event, missing phensig, mixed combinability.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Phensig not allowed for the product category.
    #[error("Hazard {phensig} is not allowed in product category {category}")]
    Lookup { category: String, phensig: String },

    /// Store unreachable or lock unattainable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Cross-year conflicts the issue-time rewrite cannot resolve.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration tables could not be loaded or are inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VtecError {
    /// Short, stable name of the error kind (used in logs and API responses).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::Lookup { .. } => "lookup",
            Self::Transport(_) => "transport",
            Self::Consistency(_) => "consistency",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
        }
    }

    /// Every error aborts the invocation that raised it.
    ///
    /// Policy problems travel as [`PolicyWarning`]s, never as errors.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        true
    }

    /// True when retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phensig_parses_and_displays() {
        let ps: Phensig = "ff.w".parse().expect("parse");
        assert_eq!(ps.phen(), "FF");
        assert_eq!(ps.sig(), "W");
        assert_eq!(ps.to_string(), "FF.W");
    }

    #[test]
    fn phensig_rejects_garbage() {
        assert!("FFW".parse::<Phensig>().is_err());
        assert!("F.W".parse::<Phensig>().is_err());
        assert!("FF.WW".parse::<Phensig>().is_err());
    }

    #[test]
    fn terminal_actions() {
        let terminal: Vec<_> = Action::ALL.iter().filter(|a| a.is_terminal()).collect();
        assert_eq!(terminal, vec![&Action::Exp, &Action::Can, &Action::Upg]);
    }

    #[test]
    fn action_codes_parse() {
        for action in Action::ALL {
            assert_eq!(action.code().parse::<Action>().expect("parse"), action);
        }
        assert!("XXX".parse::<Action>().is_err());
    }

    #[test]
    fn action_serializes_as_code() {
        let json = serde_json::to_string(&Action::Exb).expect("json");
        assert_eq!(json, "\"EXB\"");
    }

    #[test]
    fn product_class_letters() {
        for class in [
            ProductClass::Operational,
            ProductClass::Test,
            ProductClass::Experimental,
            ProductClass::ExperimentalInOperational,
        ] {
            assert_eq!(ProductClass::from_letter(class.letter()).expect("letter"), class);
        }
        assert!("Q".parse::<ProductClass>().is_err());
    }
}
