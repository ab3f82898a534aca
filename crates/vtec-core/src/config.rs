//! # Configuration Tables
//!
//! The rule tables that drive the engine:
//! - product categories and the phensigs each may carry
//! - per-hazard flags (combinable segments, expiration grace, ...)
//! - upgrade and downgrade tables
//! - the tropical phensigs whose ETNs come from the national center
//!
//! `VtecConfig` is built once at startup and passed by reference to every
//! component. There is no global state: a caller that wants different
//! tables builds a different value.

use crate::primitives::{DEFAULT_EXPIRATION_GRACE_MINUTES, DEFAULT_PURGE_HOURS, DEFAULT_TPC_BASE_ETN, MS_PER_MINUTE};
use crate::{Phensig, VtecError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Name of the override file looked up in a localization directory.
pub const LOCALIZATION_FILE_NAME: &str = "vtec.toml";

fn default_true() -> bool {
    true
}

fn default_grace() -> i64 {
    DEFAULT_EXPIRATION_GRACE_MINUTES
}

fn default_purge_hours() -> i64 {
    DEFAULT_PURGE_HOURS
}

fn default_tpc_base_etn() -> u32 {
    DEFAULT_TPC_BASE_ETN
}

fn default_self_assigning_sites() -> BTreeSet<String> {
    BTreeSet::from(["PGUM".to_string()])
}

// =============================================================================
// TABLE ENTRIES
// =============================================================================

/// Per-phensig flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HazardType {
    /// Headline text carried on records.
    pub headline: String,
    /// When true, every relevant hazard of the type must be presented in
    /// one invocation; omitted ones are cancelled.
    #[serde(default = "default_true")]
    pub combinable_segments: bool,
    /// Window before end time in which a re-issuance becomes EXP.
    #[serde(default = "default_grace")]
    pub expiration_grace_minutes: i64,
    /// Convective watch; ETNs come from the national center.
    #[serde(default)]
    pub convective_watch: bool,
    /// Routine issuance, emitted as ROU with no ETN.
    #[serde(default)]
    pub routine: bool,
    /// First ETN of the year for this phensig.
    #[serde(default)]
    pub etn_floor: Option<u32>,
}

impl HazardType {
    /// Expiration grace in milliseconds.
    #[must_use]
    pub fn expiration_grace(&self) -> i64 {
        self.expiration_grace_minutes.saturating_mul(MS_PER_MINUTE)
    }
}

/// A product category, e.g. `WSW` or `FFW`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCategory {
    pub pil: String,
    pub allowed_hazards: BTreeSet<Phensig>,
    #[serde(default = "default_purge_hours")]
    pub purge_hours: i64,
}

// =============================================================================
// VTEC CONFIG
// =============================================================================

/// Immutable engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VtecConfig {
    pub product_categories: BTreeMap<String, ProductCategory>,
    pub hazard_types: BTreeMap<Phensig, HazardType>,
    /// `upgrades[new]` lists the phensigs `new` upgrades.
    #[serde(default)]
    pub upgrades: BTreeMap<Phensig, BTreeSet<Phensig>>,
    /// `downgrades[new]` lists the phensigs `new` downgrades.
    #[serde(default)]
    pub downgrades: BTreeMap<Phensig, BTreeSet<Phensig>>,
    /// Tropical phensigs whose ETNs come from the national center.
    #[serde(default)]
    pub tpc_keys: BTreeSet<Phensig>,
    /// ETNs at or above this value are nationally assigned.
    #[serde(default = "default_tpc_base_etn")]
    pub tpc_base_etn: u32,
    /// Offices that assign their own tropical ETNs (below the boundary).
    #[serde(default = "default_self_assigning_sites")]
    pub self_assigning_tropical_sites: BTreeSet<String>,
    /// Static national-center feed: event id or phensig → ETN.
    #[serde(default)]
    pub national_etns: BTreeMap<String, u32>,
}

impl Default for VtecConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl VtecConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, VtecError> {
        let config: Self =
            toml::from_str(text).map_err(|e| VtecError::Config(format!("parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VtecError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VtecError::Config(format!("read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, VtecError> {
        toml::to_string(self).map_err(|e| VtecError::Config(format!("render: {}", e)))
    }

    /// Check that every table only references known phensigs.
    pub fn validate(&self) -> Result<(), VtecError> {
        let known = |ps: &Phensig, context: &str| {
            if self.hazard_types.contains_key(ps) {
                Ok(())
            } else {
                Err(VtecError::Config(format!(
                    "{} references unknown phensig {}",
                    context, ps
                )))
            }
        };
        for (name, category) in &self.product_categories {
            for ps in &category.allowed_hazards {
                known(ps, &format!("product category {}", name))?;
            }
        }
        for (table, entries) in [("upgrades", &self.upgrades), ("downgrades", &self.downgrades)] {
            for (new, olds) in entries {
                known(new, table)?;
                for old in olds {
                    known(old, table)?;
                    if old == new {
                        return Err(VtecError::Config(format!("{} maps {} onto itself", table, new)));
                    }
                }
            }
        }
        for ps in &self.tpc_keys {
            known(ps, "tpc_keys")?;
        }
        Ok(())
    }

    /// Look up a product category.
    pub fn category(&self, name: &str) -> Result<&ProductCategory, VtecError> {
        self.product_categories
            .get(name)
            .ok_or_else(|| VtecError::Input(format!("unknown product category '{}'", name)))
    }

    /// Look up a hazard type.
    #[must_use]
    pub fn hazard_type(&self, phensig: &Phensig) -> Option<&HazardType> {
        self.hazard_types.get(phensig)
    }

    /// True when `new` replaces `old` by upgrade.
    #[must_use]
    pub fn is_upgrade(&self, new: &Phensig, old: &Phensig) -> bool {
        self.upgrades.get(new).is_some_and(|olds| olds.contains(old))
    }

    /// True when `new` replaces `old` by downgrade.
    #[must_use]
    pub fn is_downgrade(&self, new: &Phensig, old: &Phensig) -> bool {
        self.downgrades.get(new).is_some_and(|olds| olds.contains(old))
    }

    /// True for tropical phensigs subject to national ETN assignment.
    #[must_use]
    pub fn is_tropical(&self, phensig: &Phensig) -> bool {
        self.tpc_keys.contains(phensig)
    }

    /// True when the office assigns its own tropical ETNs.
    #[must_use]
    pub fn self_assigns_tropical(&self, office: &str) -> bool {
        self.self_assigning_tropical_sites.contains(office)
    }

    // =========================================================================
    // BUILT-IN TABLES
    // =========================================================================

    /// The published rule tables.
    #[must_use]
    pub fn builtin() -> Self {
        let mut hazard_types = BTreeMap::new();
        let mut add = |ps: &str, headline: &str, combinable: bool, f: fn(&mut HazardType)| {
            let mut ht = HazardType {
                headline: headline.to_string(),
                combinable_segments: combinable,
                expiration_grace_minutes: DEFAULT_EXPIRATION_GRACE_MINUTES,
                convective_watch: false,
                routine: false,
                etn_floor: None,
            };
            f(&mut ht);
            if let Ok(ps) = ps.parse::<Phensig>() {
                hazard_types.insert(ps, ht);
            }
        };
        let long: fn(&mut HazardType) = |_| {};
        let watch: fn(&mut HazardType) = |ht| ht.convective_watch = true;
        let routine: fn(&mut HazardType) = |ht| ht.routine = true;

        // Winter weather
        add("WS.W", "WINTER STORM WARNING", true, long);
        add("WS.A", "WINTER STORM WATCH", true, long);
        add("WW.Y", "WINTER WEATHER ADVISORY", true, long);
        add("BZ.W", "BLIZZARD WARNING", true, long);
        add("IS.W", "ICE STORM WARNING", true, long);
        add("LE.W", "LAKE EFFECT SNOW WARNING", true, long);
        add("WC.W", "WIND CHILL WARNING", true, long);
        add("WC.Y", "WIND CHILL ADVISORY", true, long);
        // Non-precipitation
        add("HW.W", "HIGH WIND WARNING", true, long);
        add("HW.A", "HIGH WIND WATCH", true, long);
        add("WI.Y", "WIND ADVISORY", true, long);
        add("FG.Y", "DENSE FOG ADVISORY", true, long);
        add("HT.Y", "HEAT ADVISORY", true, long);
        add("EH.W", "EXCESSIVE HEAT WARNING", true, long);
        add("FZ.W", "FREEZE WARNING", true, long);
        add("FR.Y", "FROST ADVISORY", true, long);
        // Flood watches
        add("FF.A", "FLASH FLOOD WATCH", true, long);
        add("FA.A", "FLOOD WATCH", true, long);
        // Hydrologic warnings and statements
        add("FF.W", "FLASH FLOOD WARNING", false, long);
        add("FA.W", "FLOOD WARNING", false, long);
        add("FA.Y", "FLOOD ADVISORY", false, long);
        add("FL.W", "FLOOD WARNING", false, long);
        add("FL.Y", "FLOOD ADVISORY", false, long);
        add("HY.S", "HYDROLOGIC STATEMENT", false, routine);
        add("HY.O", "HYDROLOGIC OUTLOOK", false, routine);
        // Convective
        add("SV.W", "SEVERE THUNDERSTORM WARNING", false, long);
        add("TO.W", "TORNADO WARNING", false, long);
        add("MA.W", "SPECIAL MARINE WARNING", false, long);
        add("SV.A", "SEVERE THUNDERSTORM WATCH", true, watch);
        add("TO.A", "TORNADO WATCH", true, watch);
        // Tropical
        add("HU.W", "HURRICANE WARNING", true, long);
        add("HU.A", "HURRICANE WATCH", true, long);
        add("TR.W", "TROPICAL STORM WARNING", true, long);
        add("TR.A", "TROPICAL STORM WATCH", true, long);
        add("TY.W", "TYPHOON WARNING", true, long);
        add("TY.A", "TYPHOON WATCH", true, long);
        add("SS.W", "STORM SURGE WARNING", true, long);
        add("SS.A", "STORM SURGE WATCH", true, long);
        // Marine
        add("SC.Y", "SMALL CRAFT ADVISORY", true, long);
        add("GL.W", "GALE WARNING", true, long);
        add("SE.W", "HAZARDOUS SEAS WARNING", true, long);
        add("MF.Y", "DENSE FOG ADVISORY", true, long);

        let categories: [(&str, &str, i64, &[&str]); 12] = [
            ("WSW", "WSW", 12, &["WS.W", "WS.A", "WW.Y", "BZ.W", "IS.W", "LE.W", "WC.W", "WC.Y"]),
            ("NPW", "NPW", 12, &["HW.W", "HW.A", "WI.Y", "FG.Y", "HT.Y", "EH.W", "FZ.W", "FR.Y"]),
            ("FFA", "FFA", 12, &["FF.A", "FA.A"]),
            ("FFW", "FFW", 1, &["FF.W"]),
            ("FLW", "FLW", 8, &["FA.W", "FL.W"]),
            ("FLS", "FLS", 8, &["FA.Y", "FL.Y", "HY.S"]),
            ("ESF", "ESF", 24, &["HY.O"]),
            ("SVR", "SVR", 1, &["SV.W", "TO.W"]),
            ("SMW", "SMW", 1, &["MA.W"]),
            ("WCN", "WCN", 4, &["SV.A", "TO.A"]),
            ("TCV", "TCV", 8, &["HU.W", "HU.A", "TR.W", "TR.A", "TY.W", "TY.A", "SS.W", "SS.A"]),
            ("MWW", "MWW", 12, &["SC.Y", "GL.W", "SE.W", "MF.Y"]),
        ];
        let product_categories = categories
            .iter()
            .map(|(name, pil, purge_hours, hazards)| {
                let allowed_hazards = hazards.iter().filter_map(|h| h.parse().ok()).collect();
                (
                    (*name).to_string(),
                    ProductCategory {
                        pil: (*pil).to_string(),
                        allowed_hazards,
                        purge_hours: *purge_hours,
                    },
                )
            })
            .collect();

        let table = |rows: &[(&str, &[&str])]| -> BTreeMap<Phensig, BTreeSet<Phensig>> {
            rows.iter()
                .filter_map(|(new, olds)| {
                    let new = new.parse().ok()?;
                    let olds = olds.iter().filter_map(|o| o.parse().ok()).collect();
                    Some((new, olds))
                })
                .collect()
        };
        let upgrades = table(&[
            ("WS.W", &["WS.A", "WW.Y"]),
            ("BZ.W", &["WS.A", "WS.W", "WW.Y"]),
            ("IS.W", &["WS.A", "WW.Y"]),
            ("LE.W", &["WS.A", "WW.Y"]),
            ("WC.W", &["WC.Y"]),
            ("HW.W", &["HW.A", "WI.Y"]),
            ("EH.W", &["HT.Y"]),
            ("FZ.W", &["FR.Y"]),
            ("FF.W", &["FA.Y"]),
            ("HU.W", &["HU.A", "TR.W", "TR.A"]),
            ("HU.A", &["TR.A"]),
            ("TR.W", &["TR.A"]),
            ("TY.W", &["TY.A", "TR.W", "TR.A"]),
            ("TY.A", &["TR.A"]),
            ("SS.W", &["SS.A"]),
            ("GL.W", &["SC.Y"]),
        ]);
        let downgrades = table(&[
            ("WS.W", &["BZ.W", "IS.W"]),
            ("WW.Y", &["WS.W", "BZ.W", "IS.W", "LE.W"]),
            ("WC.Y", &["WC.W"]),
            ("WI.Y", &["HW.W"]),
            ("HT.Y", &["EH.W"]),
            ("TR.W", &["HU.W", "TY.W"]),
            ("TR.A", &["HU.A", "TY.A"]),
            ("SC.Y", &["GL.W"]),
        ]);
        let tpc_keys = ["HU.W", "HU.A", "TR.W", "TR.A", "TY.W", "TY.A"]
            .iter()
            .filter_map(|ps| ps.parse().ok())
            .collect();

        Self {
            product_categories,
            hazard_types,
            upgrades,
            downgrades,
            tpc_keys,
            tpc_base_etn: DEFAULT_TPC_BASE_ETN,
            self_assigning_tropical_sites: default_self_assigning_sites(),
            national_etns: BTreeMap::new(),
        }
    }
}

// =============================================================================
// CONFIGURATION SOURCE
// =============================================================================

/// Where configuration comes from, selected by `LOCALIZATION_DATA_SOURCE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Tables compiled into the binary.
    CodeTree,
    /// `vtec.toml` inside a localization directory.
    Localization(PathBuf),
    /// An explicit TOML file.
    File(PathBuf),
}

impl ConfigSource {
    /// Read `LOCALIZATION_DATA_SOURCE` (and `VTEC_LOCALIZATION_DIR`).
    ///
    /// `localization` selects the localization directory (default `.`);
    /// any other value, or none, selects the compiled code tree.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("LOCALIZATION_DATA_SOURCE").ok().as_deref() {
            Some(source) if source.eq_ignore_ascii_case("localization") => {
                let dir = std::env::var("VTEC_LOCALIZATION_DIR").unwrap_or_else(|_| ".".to_string());
                Self::Localization(PathBuf::from(dir))
            }
            _ => Self::CodeTree,
        }
    }

    /// Build the configuration.
    pub fn load(&self) -> Result<VtecConfig, VtecError> {
        match self {
            Self::CodeTree => Ok(VtecConfig::builtin()),
            Self::Localization(dir) => VtecConfig::from_file(dir.join(LOCALIZATION_FILE_NAME)),
            Self::File(path) => VtecConfig::from_file(path),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ps(s: &str) -> Phensig {
        s.parse().expect("phensig")
    }

    #[test]
    fn builtin_is_valid() {
        let config = VtecConfig::builtin();
        config.validate().expect("valid");
        assert!(config.category("WSW").expect("wsw").allowed_hazards.contains(&ps("WS.W")));
        assert!(config.category("NOPE").is_err());
    }

    #[test]
    fn upgrade_and_downgrade_lookups() {
        let config = VtecConfig::builtin();
        assert!(config.is_upgrade(&ps("WS.W"), &ps("WS.A")));
        assert!(!config.is_upgrade(&ps("WS.A"), &ps("WS.W")));
        assert!(config.is_downgrade(&ps("WW.Y"), &ps("WS.W")));
    }

    #[test]
    fn tropical_keys_and_guam() {
        let config = VtecConfig::builtin();
        assert!(config.is_tropical(&ps("HU.W")));
        assert!(!config.is_tropical(&ps("WS.W")));
        assert!(config.self_assigns_tropical("PGUM"));
        assert!(!config.self_assigns_tropical("KBOU"));
        assert_eq!(config.tpc_base_etn, 1000);
    }

    #[test]
    fn hazard_flags() {
        let config = VtecConfig::builtin();
        let ff = config.hazard_type(&ps("FF.W")).expect("FF.W");
        assert!(!ff.combinable_segments);
        assert_eq!(ff.expiration_grace(), 10 * MS_PER_MINUTE);
        assert!(config.hazard_type(&ps("TO.A")).expect("TO.A").convective_watch);
        assert!(config.hazard_type(&ps("HY.S")).expect("HY.S").routine);
    }

    #[test]
    fn toml_round_trip() {
        let config = VtecConfig::builtin();
        let text = config.to_toml_string().expect("render");
        let parsed = VtecConfig::from_toml_str(&text).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn toml_rejects_unknown_references() {
        let text = r#"
            [product_categories.WSW]
            pil = "WSW"
            allowed_hazards = ["WS.W"]

            [hazard_types."WS.A"]
            headline = "WINTER STORM WATCH"
        "#;
        assert!(matches!(
            VtecConfig::from_toml_str(text),
            Err(VtecError::Config(_))
        ));
    }

    #[test]
    fn toml_defaults_apply() {
        let text = r#"
            tpc_base_etn = 2000

            [product_categories.WSW]
            pil = "WSW"
            allowed_hazards = ["WS.W"]

            [hazard_types."WS.W"]
            headline = "WINTER STORM WARNING"
        "#;
        let config = VtecConfig::from_toml_str(text).expect("parse");
        let ht = config.hazard_type(&ps("WS.W")).expect("WS.W");
        assert!(ht.combinable_segments);
        assert_eq!(ht.expiration_grace_minutes, 10);
        assert_eq!(config.tpc_base_etn, 2000);
        assert!(config.self_assigns_tropical("PGUM"));
        assert_eq!(config.category("WSW").expect("wsw").purge_hours, 8);
    }
}
