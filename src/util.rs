//! Hashing, timestamp and input-validation helpers.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc3339, macros::format_description, Duration, OffsetDateTime};

use crate::error::{AirError, Result};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Facility-local wall clock, falling back to UTC when the local offset
/// cannot be determined (e.g. multi-threaded processes on some platforms).
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// `yyyy-MM-dd HH:mm:ss`, used for backup creation times.
pub fn display_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| "1970-01-01 00:00:00".to_string())
}

/// `yyyyMMdd_HHmmss`, used in snapshot file names.
pub fn file_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))
    .unwrap_or_else(|_| "19700101_000000".to_string())
}

/// Ledger date in the facility's short `yyMMdd` form, `days_ago` days back
/// from today.
pub fn ledger_date_days_ago(days_ago: i64) -> String {
    let at = now_local() - Duration::days(days_ago);
    at.format(format_description!("[year repr:last_two][month][day]"))
        .unwrap_or_else(|_| "700101".to_string())
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Batch numbers: starts with alphanumeric, then up to 63 more alphanumeric /
/// hyphen / dot / underscore / slash characters.
static BATCH_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-_./]{0,63}$").unwrap()
});

/// Validate a batch number format.
pub fn validate_batch_number(batch: &str) -> Result<()> {
    if batch.is_empty() {
        return Err(AirError::Validation("batch number must not be empty".into()));
    }
    if !BATCH_RE.is_match(batch) {
        return Err(AirError::Validation(format!(
            "invalid batch number '{batch}': 1-64 chars, alphanumeric/hyphen/dot/underscore/slash"
        )));
    }
    Ok(())
}

/// Scenario ids end up in file names; keep them to a safe alphabet.
pub fn validate_scenario_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(AirError::Validation(format!("invalid scenario id '{id}'")));
    }
    Ok(())
}

/// Validate that a path is not empty and does not contain null bytes.
pub fn validate_path(p: &Path, label: &str) -> Result<()> {
    let s = p.to_string_lossy();
    if s.is_empty() {
        return Err(AirError::Validation(format!("{label} path is empty")));
    }
    if s.contains('\0') {
        return Err(AirError::Validation(format!(
            "{label} path contains null byte"
        )));
    }
    Ok(())
}

/// `<path>.old`, the crash-safety copy kept while a restore is in flight.
pub fn with_old_suffix(p: &Path) -> PathBuf {
    let mut s = p.as_os_str().to_os_string();
    s.push(".old");
    PathBuf::from(s)
}

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("AIR_GIT_HASH");
pub const BUILD_TS: &str = env!("AIR_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("AIR ledger v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_hex_is_lowercase() {
        let h = sha256_hex(b"hello");
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(h, h.to_lowercase());
    }

    #[test]
    fn valid_batch_numbers() {
        assert!(validate_batch_number("BATCH-01").is_ok());
        assert!(validate_batch_number("LEU/2026.3_a").is_ok());
    }

    #[test]
    fn invalid_batch_numbers() {
        assert!(validate_batch_number("").is_err());
        assert!(validate_batch_number("-lead").is_err());
        assert!(validate_batch_number("has space").is_err());
        assert!(validate_batch_number(&"A".repeat(100)).is_err());
    }

    #[test]
    fn scenario_ids_are_file_safe() {
        assert!(validate_scenario_id("scen_pit").is_ok());
        assert!(validate_scenario_id("../etc").is_err());
        assert!(validate_scenario_id("").is_err());
    }

    #[test]
    fn timestamp_shapes() {
        let at = time::macros::datetime!(2026-03-05 07:08:09 UTC);
        assert_eq!(display_timestamp(at), "2026-03-05 07:08:09");
        assert_eq!(file_timestamp(at), "20260305_070809");
    }

    #[test]
    fn short_ledger_date_has_six_digits() {
        let d = ledger_date_days_ago(10);
        assert_eq!(d.len(), 6);
        assert!(d.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn old_suffix_appended() {
        assert_eq!(
            with_old_suffix(Path::new("/tmp/air_inventory.db")),
            PathBuf::from("/tmp/air_inventory.db.old")
        );
    }

    #[test]
    fn version_string_non_empty() {
        assert!(version_string().contains("AIR"));
    }
}
