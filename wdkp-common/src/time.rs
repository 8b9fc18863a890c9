//! Timestamp utilities
//!
//! Addon dumps carry Unix epoch seconds; everything here works in that unit.

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as epoch seconds
pub fn now_epoch() -> i64 {
    now().timestamp()
}

/// Whole days to seconds
pub fn days_to_seconds(days: u32) -> i64 {
    i64::from(days) * 24 * 60 * 60
}

/// Render epoch seconds as `YYYY-MM-DD HH:MM` (UTC)
///
/// Out-of-range values render as the raw number.
pub fn format_epoch(epoch: i64) -> String {
    match Utc.timestamp_opt(epoch, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => epoch.to_string(),
    }
}
