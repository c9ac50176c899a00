//! # Payhook Core
//!
//! Security gates and idempotent processing for asynchronous payment-status
//! webhooks delivered by an external payment gateway.
//!
//! Every inbound delivery is run through a fixed gauntlet of checks (source
//! address, rate limit, signature, freshness, replay) before the business
//! event it carries is handed to an idempotency gate that guarantees the
//! downstream payment-state mutation happens at most once per business key.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`WebhookEventStore`],
//!   [`SecurityEventStore`], [`PaymentStatusMutator`], [`RateLimiter`])
//! - Infrastructure implementations are injected at runtime
//! - All time-dependent logic reads the current time through a [`Clock`]
//!
//! ## Usage
//!
//! ```rust
//! use payhook_core::{BusinessKey, EventId};
//!
//! let event_id = EventId::new();
//! let key = BusinessKey::new("txn-123", "DONE").unwrap();
//! assert_eq!(key.to_string(), "txn-123:DONE");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use ulid::Ulid;

/// Standard result type for payhook operations
pub type PayhookResult<T> = Result<T, PayhookError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for a single webhook delivery attempt
///
/// Generated at receipt time. Two deliveries of the same business event get
/// different identifiers; the [`BusinessKey`] is what ties them together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of event ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// The real-world payment event a delivery describes
///
/// A gateway transaction identifier paired with the status the gateway is
/// reporting. At most one delivery per business key may ever be processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusinessKey {
    pub transaction_id: String,
    pub status: String,
}

impl BusinessKey {
    /// Create new business key with validation
    pub fn new(
        transaction_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let transaction_id = transaction_id.into();
        let status = status.into();

        if transaction_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "transaction_id".to_string(),
            });
        }

        if status.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "status".to_string(),
            });
        }

        Ok(Self {
            transaction_id,
            status,
        })
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.status)
    }
}

// ============================================================================
// Time
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing `DateTime`
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Build timestamp from Unix epoch seconds
    pub fn from_unix_seconds(seconds: i64) -> Result<Self, ParseError> {
        DateTime::from_timestamp(seconds, 0)
            .map(Self)
            .ok_or_else(|| ParseError::InvalidFormat {
                expected: "Unix epoch seconds".to_string(),
                actual: seconds.to_string(),
            })
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add seconds to timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        self.add_duration(Duration::from_secs(seconds))
    }

    /// Add duration to timestamp, saturating at the latest representable instant
    pub fn add_duration(&self, duration: Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// Subtract duration from timestamp, saturating at the earliest representable instant
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MIN_UTC))
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }

    /// Absolute distance between two timestamps in whole milliseconds
    pub fn abs_diff_millis(&self, other: Self) -> u64 {
        self.0
            .signed_duration_since(other.0)
            .num_milliseconds()
            .unsigned_abs()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

/// Source of the current time
///
/// Freshness checks, rate-limit windows, replay lookback and processing
/// durations all read time through this trait.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to
///
/// Cloning shares the underlying time, so a test can hold one handle and
/// advance the clock seen by every component built from the other.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = current.add_duration(duration);
    }

    /// Jump to an absolute time
    pub fn set(&self, timestamp: Timestamp) {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = timestamp;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Security-related failures requiring immediate attention
    Security,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' has invalid value: {message}")]
    InvalidValue { field: String, message: String },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error type for payhook operations
#[derive(Debug, thiserror::Error)]
pub enum PayhookError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Downstream mutation failed: {0}")]
    Mutation(#[from] MutationError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl PayhookError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Mutation(e) => e.is_transient(),
            Self::Validation(_) => false,
            Self::Parse(_) => false,
            Self::Configuration { .. } => false,
        }
    }

    /// Get error category for monitoring and alerting
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::Parse(_) => ErrorCategory::Permanent,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Store(_) | Self::Mutation(_) => {
                if self.is_transient() {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Webhook event records and payload parsing
pub mod event;

/// Explicit security configuration
pub mod config;

/// HMAC-SHA256 signature verification over a canonical payload string
pub mod signature;

/// Declared-timestamp clock-skew check
pub mod freshness;

/// Source address allowlisting
pub mod ip_allowlist;

/// Fixed-window rate limiting per source identifier
pub mod rate_limit;

/// Payload-hash replay detection
pub mod replay;

/// Security event records and recording
pub mod security_events;

/// Persistence and downstream collaborator interfaces
pub mod store;

/// At-most-once processing per business key
pub mod idempotency;

/// Ordered validation gauntlet and hand-off to processing
pub mod pipeline;

/// Operator-initiated reprocessing of stored events
pub mod retry;

/// Bounded work queue and worker pool
pub mod dispatch;

/// Infrastructure implementations of the store and mutator interfaces
pub mod adapters;

// Re-export key types for convenience
pub use adapters::{InMemorySecurityEventStore, InMemoryWebhookEventStore, RecordingPaymentMutator};
pub use config::{ConfigError, WebhookSecret, WebhookSecurityConfig};
pub use dispatch::{DispatchError, DispatcherConfig, PipelineObserver, WebhookDispatcher};
pub use event::{
    InboundWebhook, PaymentWebhookPayload, RetryStatus, WebhookEvent, WebhookEventValidation,
};
pub use freshness::TimestampGuard;
pub use idempotency::{IdempotencyGate, IdempotentOutcome};
pub use ip_allowlist::IpAllowlist;
pub use pipeline::{
    PipelineDependencies, PipelineOutcome, PipelineStage, RejectionReason, ValidationOutcome,
    WebhookPipeline,
};
pub use rate_limit::{FixedWindowRateLimiter, RateLimitDecision, RateLimiter};
pub use replay::ReplayGuard;
pub use retry::{RetryCoordinator, RetryError, RetryOutcome};
pub use security_events::{
    AlertNotifier, SecurityEvent, SecurityEventRecorder, SecurityEventType, Severity,
    TracingAlertNotifier, ValidationDecision,
};
pub use signature::SignatureVerifier;
pub use store::{
    ClaimOutcome, MutationError, PaymentStatusMutator, SecurityEventFilter, SecurityEventStore,
    SecurityEventSummary, StoreError, WebhookEventFilter, WebhookEventStatusFilter,
    WebhookEventStore, WebhookEventUpdate,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
