//! # Security Configuration
//!
//! Every toggle the webhook gates read, as one explicit struct with named
//! fields and serde defaults. An entirely empty configuration deserializes
//! to [`WebhookSecurityConfig::default`], which has no shared secret and
//! therefore rejects every delivery at the signature gate.

use crate::ip_allowlist::IpAllowlist;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ============================================================================
// Secret container
// ============================================================================

/// Shared secret used to key the webhook HMAC
///
/// The backing memory is zeroed on drop. `Debug` and `Serialize` never emit
/// the value.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct WebhookSecret {
    inner: String,
}

impl WebhookSecret {
    /// Wrap a raw secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Get secret as bytes (only for immediate use)
    pub fn expose_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    /// Check if secret is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSecret")
            .field("length", &self.inner.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl Serialize for WebhookSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Largest accepted value for any second-valued window (366 days)
pub const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 60 * 60;

/// Headroom a claim lease must keep over the downstream timeout
pub const CLAIM_LEASE_MARGIN: Duration = Duration::from_secs(5);

/// Configuration for the webhook validation gates and processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSecurityConfig {
    /// HMAC key shared with the gateway. Absent means every signature fails.
    pub shared_secret: Option<WebhookSecret>,

    /// Restrict deliveries to `allowed_ips`
    pub enable_ip_allowlist: bool,

    /// Exact addresses or CIDR blocks (`203.0.113.0/24`)
    pub allowed_ips: Vec<String>,

    /// Maximum clock skew accepted on the declared timestamp
    pub timestamp_tolerance_seconds: u64,

    /// Length of one rate-limit window
    pub rate_limit_window_seconds: u64,

    /// Requests allowed per source within one window
    pub rate_limit_max_requests: u32,

    /// Reject byte-identical resends within the lookback window
    pub enable_replay_protection: bool,

    /// How far back replay detection looks
    pub replay_lookback_seconds: u64,

    /// Upper bound on any single gate
    pub gate_timeout_ms: u64,

    /// Upper bound on the downstream mutation
    pub downstream_timeout_ms: u64,

    /// How long a processing claim on a business key is honoured
    pub claim_lease_seconds: u64,

    /// Operator retries allowed per stored event
    pub max_operator_retries: u32,

    /// Deliveries whose user agent does not start with this are flagged
    pub expected_user_agent_prefix: Option<String>,
}

impl Default for WebhookSecurityConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            enable_ip_allowlist: false,
            allowed_ips: Vec::new(),
            timestamp_tolerance_seconds: 300,
            rate_limit_window_seconds: 60,
            rate_limit_max_requests: 100,
            enable_replay_protection: true,
            replay_lookback_seconds: 24 * 60 * 60,
            gate_timeout_ms: 2_000,
            downstream_timeout_ms: 10_000,
            claim_lease_seconds: 60,
            max_operator_retries: 5,
            expected_user_agent_prefix: None,
        }
    }
}

impl WebhookSecurityConfig {
    /// Check the configuration for values that would disable a gate by accident
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero-length windows or timeouts,
    /// a zero request limit, or an allowlist entry that cannot be parsed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_window_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "rate_limit_window_seconds".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.rate_limit_max_requests == 0 {
            return Err(ConfigError::Invalid {
                field: "rate_limit_max_requests".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.gate_timeout_ms == 0 || self.downstream_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "timeouts".to_string(),
                message: "gate and downstream timeouts must be greater than 0".to_string(),
            });
        }

        if self.claim_lease_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "claim_lease_seconds".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        for (field, seconds) in [
            ("timestamp_tolerance_seconds", self.timestamp_tolerance_seconds),
            ("rate_limit_window_seconds", self.rate_limit_window_seconds),
            ("replay_lookback_seconds", self.replay_lookback_seconds),
            ("claim_lease_seconds", self.claim_lease_seconds),
            ("gate_timeout_ms", self.gate_timeout_ms / 1000),
            ("downstream_timeout_ms", self.downstream_timeout_ms / 1000),
        ] {
            if seconds > MAX_WINDOW_SECONDS {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    message: format!("must not exceed {} seconds", MAX_WINDOW_SECONDS),
                });
            }
        }

        // The lease must outlive the slowest mutation it guards
        if self.claim_lease() < self.downstream_timeout() + CLAIM_LEASE_MARGIN {
            return Err(ConfigError::Invalid {
                field: "claim_lease_seconds".to_string(),
                message: format!(
                    "must cover downstream_timeout_ms ({}ms) plus {}s",
                    self.downstream_timeout_ms,
                    CLAIM_LEASE_MARGIN.as_secs()
                ),
            });
        }

        if self.enable_ip_allowlist {
            IpAllowlist::parse(&self.allowed_ips)?;
        }

        Ok(())
    }

    pub fn timestamp_tolerance(&self) -> Duration {
        Duration::from_secs(self.timestamp_tolerance_seconds)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    pub fn replay_lookback(&self) -> Duration {
        Duration::from_secs(self.replay_lookback_seconds)
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_timeout_ms)
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream_timeout_ms)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_seconds)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Invalid allowlist entry '{entry}': {message}")]
    InvalidAllowlistEntry { entry: String, message: String },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
