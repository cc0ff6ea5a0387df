//! Human-readable wait formatting
//!
//! Used for cooldown rejections, where the caller is told how long to wait
//! before retrying. Values always round up so the user is never told to come
//! back before the wait has actually elapsed.

use std::time::Duration;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3600;

/// Format a remaining wait as a coarse, rounded-up unit.
///
/// - one hour or more: `N hour(s)`
/// - one minute or more: `N minute(s)`
/// - otherwise: `N second(s)` (at least 1)
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use needle_common::human_time::format_wait;
///
/// assert_eq!(format_wait(Duration::from_secs(3 * 3600)), "3 hour(s)");
/// assert_eq!(format_wait(Duration::from_secs(3 * 3600 - 1)), "3 hour(s)");
/// assert_eq!(format_wait(Duration::from_secs(90)), "2 minute(s)");
/// assert_eq!(format_wait(Duration::from_millis(200)), "1 second(s)");
/// ```
pub fn format_wait(remaining: Duration) -> String {
    let secs = ceil_secs(remaining);

    if secs >= SECONDS_PER_HOUR {
        format!("{} hour(s)", div_ceil(secs, SECONDS_PER_HOUR))
    } else if secs >= SECONDS_PER_MINUTE {
        format!("{} minute(s)", div_ceil(secs, SECONDS_PER_MINUTE))
    } else {
        format!("{} second(s)", secs.max(1))
    }
}

/// Format a wait as a full user-facing message.
pub fn wait_message(remaining: Duration) -> String {
    format!("Please wait {} before trying again", format_wait(remaining))
}

fn ceil_secs(d: Duration) -> u64 {
    if d.subsec_nanos() > 0 {
        d.as_secs() + 1
    } else {
        d.as_secs()
    }
}

fn div_ceil(value: u64, unit: u64) -> u64 {
    (value + unit - 1) / unit
}
