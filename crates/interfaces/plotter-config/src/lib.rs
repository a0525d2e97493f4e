//! Central configuration constants for runtime limits and defaults.

use std::time::Duration;

/// Environment variable holding the device API base URL.
pub const BASE_URL_ENV: &str = "PLOTTER_API_URL";

/// Base URL used when the environment does not provide one.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default status poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_500;

/// Minimum allowed status poll interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 250;

/// Maximum allowed status poll interval in milliseconds.
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// Consecutive failed polls before the status is reported as UNKNOWN.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Polls watched after a command acknowledgement before it is marked unconfirmed.
pub const DEFAULT_CONFIRMATION_POLLS: u32 = 5;

/// Time after a command acknowledgement before it is marked unconfirmed.
pub const DEFAULT_CONFIRMATION_WINDOW_MS: u64 = 5_000;

/// Upper bound on a single command round-trip.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on a single status fetch.
pub const DEFAULT_STATUS_TIMEOUT_MS: u64 = 5_000;

/// Default number of uploads (to distinct projects) allowed in flight.
pub const DEFAULT_UPLOAD_PARALLELISM: usize = 2;

/// Minimum allowed upload parallelism.
pub const MIN_UPLOAD_PARALLELISM: usize = 1;

/// Maximum allowed upload parallelism.
pub const MAX_UPLOAD_PARALLELISM: usize = 8;

/// Archived commands kept for history display.
pub const COMMAND_HISTORY_LIMIT: usize = 32;

/// Deleted project ids remembered for refusing uploads; the oldest is forgotten first.
pub const INVALIDATED_PROJECT_LIMIT: usize = 64;

/// Clamp a poll interval into the allowed range.
pub fn clamp_poll_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS))
}

/// Convenience function to clamp an upload parallelism value into allowed range.
pub fn clamp_upload_parallelism(v: usize) -> usize {
    v.clamp(MIN_UPLOAD_PARALLELISM, MAX_UPLOAD_PARALLELISM)
}

/// Resolve the API base URL from the environment, falling back to the local default.
pub fn base_url_from_env() -> String {
    match std::env::var(BASE_URL_ENV) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => DEFAULT_BASE_URL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_clamped() {
        assert_eq!(clamp_poll_interval(10), Duration::from_millis(MIN_POLL_INTERVAL_MS));
        assert_eq!(clamp_poll_interval(1_000), Duration::from_millis(1_000));
        assert_eq!(
            clamp_poll_interval(u64::MAX),
            Duration::from_millis(MAX_POLL_INTERVAL_MS)
        );
    }

    #[test]
    fn upload_parallelism_is_clamped() {
        assert_eq!(clamp_upload_parallelism(0), MIN_UPLOAD_PARALLELISM);
        assert_eq!(clamp_upload_parallelism(100), MAX_UPLOAD_PARALLELISM);
    }
}
