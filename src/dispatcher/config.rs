//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Items in flight across all identities.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Attempts per item, counting the first, for retryable failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Snapshots older than this are discarded on restore.
    #[serde(default = "default_snapshot_ttl_ms")]
    pub snapshot_ttl_ms: u64,
    /// Command channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_snapshot_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            snapshot_ttl_ms: default_snapshot_ttl_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl DispatcherConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: DispatcherConfig = toml::from_str("max_concurrent = 5").unwrap();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.snapshot_ttl(), Duration::from_secs(300));
    }
}
