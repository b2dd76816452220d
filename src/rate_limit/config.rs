//! Rate limiter configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-identity admission limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sliding window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Requests admitted per identity within one window.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    /// Requests per identity allowed in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> usize {
    20
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}
