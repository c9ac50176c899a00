//! # Rate Limiting
//!
//! Fixed-window request counting per source identifier.
//!
//! The in-process limiter is approximate by nature: it is per instance and
//! resets on restart. It exists to dampen abuse, not to enforce a contract.
//! The [`RateLimiter`] trait lets a shared external counter replace it
//! without touching the pipeline.

use crate::{Clock, Timestamp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Result of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// When the current window ends
    pub reset_at: Timestamp,
}

impl RateLimitDecision {
    /// Time until the window resets, as seen from `now`
    pub fn retry_after(&self, now: Timestamp) -> Duration {
        self.reset_at.duration_since(now)
    }
}

/// Decides whether a request from `identifier` may proceed
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count a request and decide. Rejected requests are not counted.
    async fn allow(&self, identifier: &str) -> RateLimitDecision;
}

/// Request count for one identifier within one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub identifier: String,
    pub count: u32,
    pub window_reset_at: Timestamp,
}

/// In-process fixed-window limiter
///
/// Windows are created on the first request from an identifier and dropped
/// on any later check that finds them expired.
pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
            clock,
        }
    }

    /// Number of identifiers with a live window
    pub fn tracked_identifiers(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn check(&self, identifier: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        windows.retain(|_, w| w.window_reset_at > now);

        let window = windows
            .entry(identifier.to_string())
            .or_insert_with(|| RateLimitWindow {
                identifier: identifier.to_string(),
                count: 0,
                window_reset_at: now.add_duration(self.window),
            });

        if window.count >= self.max_requests {
            debug!(
                identifier = identifier,
                count = window.count,
                "Rate limit window exhausted"
            );
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: window.window_reset_at,
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - window.count,
            reset_at: window.window_reset_at,
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn allow(&self, identifier: &str) -> RateLimitDecision {
        self.check(identifier)
    }
}

impl std::fmt::Debug for FixedWindowRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowRateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
