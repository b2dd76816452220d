//! Request admission and retry pacing.
//!
//! The sliding-window [`RateLimiter`] is process-local and owned by a single
//! writer (the dispatcher loop). The free functions are shared backoff
//! helpers used by the executor, orchestrator, dispatcher and HTTP client.

mod config;
mod limiter;

pub use config::RateLimitConfig;
pub use limiter::{IdentityStats, RateLimiter};

use std::time::Duration;

/// Upper bound for any computed backoff or Retry-After wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_BACKOFF))
}

/// Calculate exponential backoff delay for a given attempt.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}
