//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Current wall-clock time as Unix milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix milliseconds to a UTC timestamp
///
/// Out-of-range values clamp to the Unix epoch.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
}
