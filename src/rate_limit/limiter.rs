//! Sliding-window limiter with a per-identity in-flight cap.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::config::RateLimitConfig;

#[derive(Debug, Default)]
struct IdentityState {
    /// Admission times, oldest first.
    timestamps: Vec<Instant>,
    active: usize,
}

impl IdentityState {
    /// Drop timestamps that fell out of the window.
    fn prune(&mut self, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        // Timestamps are appended in order, so the stale ones form a prefix.
        let cutoff_idx = self.timestamps.partition_point(|t| *t <= cutoff);
        if cutoff_idx > 0 {
            self.timestamps.drain(0..cutoff_idx);
        }
    }
}

/// Snapshot of one identity's limiter state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStats {
    pub requests_in_window: usize,
    pub active: usize,
    pub remaining: usize,
    pub reset_in: Duration,
}

/// Per-identity rate limiter. Not persisted; restart clears all state.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    identities: HashMap<String, IdentityState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            identities: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn state(&mut self, identity: &str) -> Option<&mut IdentityState> {
        let window = self.config.window();
        let now = Instant::now();
        let state = self.identities.get_mut(identity)?;
        state.prune(now, window);
        Some(state)
    }

    /// Whether a new request for this identity would be admitted.
    ///
    /// Both the window budget and the in-flight cap must have room.
    pub fn is_allowed(&mut self, identity: &str) -> bool {
        let max_requests = self.config.max_requests;
        let max_concurrent = self.config.max_concurrent;
        match self.state(identity) {
            Some(state) => state.timestamps.len() < max_requests && state.active < max_concurrent,
            None => max_requests > 0 && max_concurrent > 0,
        }
    }

    /// Record an admitted request.
    pub fn add_request(&mut self, identity: &str) {
        let window = self.config.window();
        let now = Instant::now();
        let state = self.identities.entry(identity.to_string()).or_default();
        state.prune(now, window);
        state.timestamps.push(now);
        state.active += 1;
    }

    /// Record a completed request. Its timestamp stays in the window.
    pub fn remove_request(&mut self, identity: &str) {
        if let Some(state) = self.identities.get_mut(identity) {
            state.active = state.active.saturating_sub(1);
        }
    }

    /// Requests still admissible in the current window.
    pub fn remaining(&mut self, identity: &str) -> usize {
        let max_requests = self.config.max_requests;
        match self.state(identity) {
            Some(state) => max_requests.saturating_sub(state.timestamps.len()),
            None => max_requests,
        }
    }

    /// Time until the oldest request leaves the window.
    pub fn time_until_reset(&mut self, identity: &str) -> Duration {
        let window = self.config.window();
        let now = Instant::now();
        match self.state(identity).and_then(|s| s.timestamps.first().copied()) {
            Some(oldest) => (oldest + window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn active(&self, identity: &str) -> usize {
        self.identities.get(identity).map(|s| s.active).unwrap_or(0)
    }

    pub fn stats(&mut self, identity: &str) -> IdentityStats {
        let remaining = self.remaining(identity);
        let reset_in = self.time_until_reset(identity);
        let (requests_in_window, active) = self
            .identities
            .get(identity)
            .map(|s| (s.timestamps.len(), s.active))
            .unwrap_or((0, 0));
        IdentityStats {
            requests_in_window,
            active,
            remaining,
            reset_in,
        }
    }

    /// Forget identities with nothing in flight and nothing in the window.
    pub fn prune_idle(&mut self) {
        let window = self.config.window();
        let now = Instant::now();
        self.identities.retain(|_, state| {
            state.prune(now, window);
            state.active > 0 || !state.timestamps.is_empty()
        });
    }
}
