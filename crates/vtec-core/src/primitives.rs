//! # Engine Primitives
//!
//! Hardcoded constants for the VTEC engine.
//!
//! All times in the engine are `i64` milliseconds since the Unix epoch, UTC.
//! These values are compiled into the binary and are immutable at runtime;
//! anything a site may tune lives in [`crate::config::VtecConfig`] instead.

/// One minute in milliseconds.
pub const MS_PER_MINUTE: i64 = 60 * 1000;

/// One hour in milliseconds.
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

/// One day in milliseconds.
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// End time carried by "until further notice" events.
///
/// This is the largest 32-bit epoch second, expressed in milliseconds.
/// VTEC strings render it as `000000T0000Z`.
pub const UFN_END_TIME: i64 = (i32::MAX as i64) * 1000;

/// Grace applied by the squeezer after an event's end time before it
/// stops being "live".
pub const SQUEEZE_GRACE: i64 = MS_PER_HOUR;

/// Age after which a UFN event that was never cancelled is force-cancelled.
pub const UFN_STALE_AGE: i64 = 14 * MS_PER_DAY;

/// Default window before an event's end time in which a re-issuance
/// becomes EXP instead of CON.
pub const DEFAULT_EXPIRATION_GRACE_MINUTES: i64 = 10;

/// Default boundary between locally and nationally assigned tropical ETNs.
pub const DEFAULT_TPC_BASE_ETN: u32 = 1000;

/// Largest ETN that fits the four-digit VTEC field.
pub const MAX_ETN: u32 = 9999;

/// Default product purge window in hours.
pub const DEFAULT_PURGE_HOURS: i64 = 8;

/// Suffix of a statewide geo id ("all zones in state").
pub const STATEWIDE_SUFFIX: &str = "000";

// =============================================================================
// PERSISTENCE FORMAT
// =============================================================================

/// Magic bytes for the binary record-set format used by the redb backend.
pub const MAGIC_BYTES: &[u8; 4] = b"VTEC";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// LOCK ACQUISITION
// =============================================================================

/// First retry delay when the advisory store lock is busy.
pub const LOCK_BACKOFF_BASE_MS: u64 = 20;

/// Upper bound for a single retry delay.
pub const LOCK_BACKOFF_MAX_MS: u64 = 2000;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of hazard events accepted in one engine invocation.
pub const MAX_EVENTS_PER_INVOCATION: usize = 1000;

/// Maximum number of zones a single hazard event may cover.
pub const MAX_ZONES_PER_EVENT: usize = 2000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ufn_sentinel_is_2038() {
        // 2038-01-19T03:14:07Z
        assert_eq!(UFN_END_TIME, 2_147_483_647_000);
    }

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"VTEC");
    }
}
