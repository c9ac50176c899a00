//! # Timestamp Freshness
//!
//! Bounds how far a delivery's declared timestamp may drift from local time.
//! This limits exposure to delayed retransmission; it is not replay
//! protection on its own.

use crate::{Clock, ParseError, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default accepted clock skew
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Parse a declared timestamp
///
/// Accepts RFC3339 with any offset, or integer Unix epoch seconds.
pub fn parse_declared(declared: &str) -> Result<Timestamp, ParseError> {
    let trimmed = declared.trim();
    let is_epoch = !trimmed.is_empty()
        && trimmed
            .strip_prefix('-')
            .unwrap_or(trimmed)
            .chars()
            .all(|c| c.is_ascii_digit());

    if is_epoch {
        let seconds = trimmed.parse::<i64>().map_err(|_| ParseError::InvalidFormat {
            expected: "Unix epoch seconds".to_string(),
            actual: declared.to_string(),
        })?;
        return Timestamp::from_unix_seconds(seconds);
    }

    Timestamp::from_rfc3339(trimmed)
}

/// Rejects declared timestamps outside the allowed skew window
#[derive(Debug, Clone)]
pub struct TimestampGuard {
    clock: Arc<dyn Clock>,
}

impl TimestampGuard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// True iff `declared` parses and `|now - declared| <= tolerance`
    pub fn is_fresh(&self, declared: &str, tolerance: Duration) -> bool {
        let timestamp = match parse_declared(declared) {
            Ok(ts) => ts,
            Err(e) => {
                debug!(error = %e, "Declared timestamp unparseable");
                return false;
            }
        };

        let skew_ms = self.clock.now().abs_diff_millis(timestamp);
        let tolerance_ms = u64::try_from(tolerance.as_millis()).unwrap_or(u64::MAX);
        skew_ms <= tolerance_ms
    }
}

#[cfg(test)]
#[path = "freshness_tests.rs"]
mod tests;
