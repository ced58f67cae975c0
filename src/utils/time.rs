//! Time and timestamp utilities

/// Get current Unix timestamp in seconds
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Get current Unix timestamp in nanoseconds
///
/// Acknowledgement times, message receive times and read watermarks all use
/// this resolution so they can be compared directly.
pub fn current_timestamp_nanos() -> i64 {
    // Out of range only after the year 2262.
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
