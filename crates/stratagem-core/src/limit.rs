//! Per-identity stream admission limits.
//!
//! A fixed-window counter in front of the stream endpoint. Enforcement
//! is off by default (`RateLimitConfig::enabled`); when off, `check`
//! short-circuits to allowed without touching the window map.

use dashmap::DashMap;
use stratagem_types::config::RateLimitConfig;

use std::time::Duration;

use crate::context::now_ms;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// How long until the current window rolls over, set on denial.
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }
}

/// Admission gate consulted before a turn stream starts.
pub trait RateLimiter: Send + Sync {
    fn check(&self, identity: &str) -> RateDecision;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at_ms: i64,
    count: u32,
}

/// Fixed-window counter keyed by identity.
///
/// Counting is approximate across threads (two racing requests at a
/// window boundary may both land in the fresh window), which is fine
/// for an admission limit.
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Check with an explicit clock. `check` delegates here with the
    /// wall clock; tests pin `now_ms` to cross window boundaries.
    pub fn check_at(&self, identity: &str, now_ms: i64) -> RateDecision {
        if !self.config.enabled {
            return RateDecision::allowed();
        }

        let window_ms = i64::try_from(self.config.window_secs.saturating_mul(1_000))
            .unwrap_or(i64::MAX);
        let mut window = self.windows.entry(identity.to_string()).or_insert(Window {
            started_at_ms: now_ms,
            count: 0,
        });

        if now_ms - window.started_at_ms >= window_ms {
            window.started_at_ms = now_ms;
            window.count = 0;
        }
        window.count += 1;

        if window.count <= self.config.max_requests {
            RateDecision::allowed()
        } else {
            let remaining_ms = (window.started_at_ms + window_ms - now_ms).max(0) as u64;
            RateDecision {
                allowed: false,
                retry_after: Some(Duration::from_millis(remaining_ms)),
            }
        }
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check(&self, identity: &str) -> RateDecision {
        self.check_at(identity, now_ms())
    }
}
