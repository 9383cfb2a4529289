//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole seconds elapsed since `earlier` (zero when `earlier` is in the future)
///
/// Used for uptime and freshness reporting.
pub fn seconds_since(earlier: DateTime<Utc>) -> u64 {
    let delta = now().signed_duration_since(earlier).num_seconds();
    delta.max(0) as u64
}
