//! # Persistence and Downstream Interfaces
//!
//! Narrow interfaces over the system of record and the payment-state
//! mutation the pipeline ultimately drives. Business logic depends only on
//! these traits; implementations are injected at runtime.
//!
//! The processed flag on a business key is the one piece of shared state with
//! a correctness requirement. [`WebhookEventStore::try_claim`] and
//! [`WebhookEventStore::mark_processed`] must be atomic conditional writes in
//! every implementation: two concurrent callers must never both observe an
//! unclaimed, unprocessed key.

use crate::event::{RetryStatus, WebhookEvent};
use crate::security_events::{SecurityEvent, SecurityEventType, Severity, ValidationDecision};
use crate::{BusinessKey, EventId, ParseError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default page size for list queries
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Upper bound on any list query
pub const MAX_LIST_LIMIT: usize = 500;

// ============================================================================
// Webhook event store
// ============================================================================

/// Result of attempting to claim a business key for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller holds the key until it marks it processed or releases it
    Claimed,
    /// Another delivery already processed this key
    AlreadyProcessed,
    /// Another delivery holds an unexpired claim on this key
    InFlight { holder: EventId },
}

/// Mutable bookkeeping fields on a stored event
///
/// The processed flag is deliberately absent; it only moves through
/// [`WebhookEventStore::mark_processed`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookEventUpdate {
    /// `Some(None)` clears the message
    pub error_message: Option<Option<String>>,
    pub retry_status: Option<RetryStatus>,
    pub retry_count: Option<u32>,
    pub last_retry_at: Option<Timestamp>,
}

impl WebhookEventUpdate {
    /// Record a processing failure
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(Some(message.into())),
            ..Default::default()
        }
    }

    /// Record the outcome of an operator retry
    pub fn retry(status: RetryStatus, retry_count: u32, at: Timestamp) -> Self {
        Self {
            retry_status: Some(status),
            retry_count: Some(retry_count),
            last_retry_at: Some(at),
            ..Default::default()
        }
    }

    pub fn with_error_message(mut self, message: Option<String>) -> Self {
        self.error_message = Some(message);
        self
    }

    /// Apply the set fields to `event`
    pub fn apply_to(&self, event: &mut WebhookEvent) {
        if let Some(message) = &self.error_message {
            event.error_message = message.clone();
        }
        if let Some(status) = self.retry_status {
            event.retry_status = Some(status);
        }
        if let Some(count) = self.retry_count {
            event.retry_count = count;
        }
        if let Some(at) = self.last_retry_at {
            event.last_retry_at = Some(at);
        }
    }
}

/// Operator-facing status buckets for stored events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEventStatusFilter {
    /// Passed validation, processing did not complete
    Failed,
    /// Did not pass validation
    Rejected,
    /// Processing completed
    Processed,
    /// Carries a high or critical security event
    Suspicious,
}

impl WebhookEventStatusFilter {
    pub fn matches(&self, event: &WebhookEvent) -> bool {
        match self {
            Self::Failed => event.is_failed(),
            Self::Rejected => !event.validation.valid,
            Self::Processed => event.processed,
            Self::Suspicious => event.is_suspicious(),
        }
    }
}

impl FromStr for WebhookEventStatusFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            "processed" => Ok(Self::Processed),
            "suspicious" => Ok(Self::Suspicious),
            other => Err(ParseError::InvalidFormat {
                expected: "failed, rejected, processed or suspicious".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

/// Query over stored webhook events
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEventFilter {
    pub status: Option<WebhookEventStatusFilter>,
    pub business_key: Option<BusinessKey>,
    pub since: Option<Timestamp>,
    pub limit: usize,
}

impl Default for WebhookEventFilter {
    fn default() -> Self {
        Self {
            status: None,
            business_key: None,
            since: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl WebhookEventFilter {
    pub fn matches(&self, event: &WebhookEvent) -> bool {
        if let Some(status) = &self.status {
            if !status.matches(event) {
                return false;
            }
        }
        if let Some(key) = &self.business_key {
            if event.business_key.as_ref() != Some(key) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.received_at < since {
                return false;
            }
        }
        true
    }

    /// Limit clamped to `1..=MAX_LIST_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

/// System of record for webhook delivery attempts
#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Persist a new delivery record
    async fn insert(&self, event: WebhookEvent) -> Result<(), StoreError>;

    /// Load one delivery record
    async fn get(&self, id: EventId) -> Result<Option<WebhookEvent>, StoreError>;

    /// Most recent record that passed validation with the same payload hash
    /// and business key, received at or after `since`
    async fn find_by_hash(
        &self,
        payload_hash: &str,
        business_key: &BusinessKey,
        since: Timestamp,
    ) -> Result<Option<WebhookEvent>, StoreError>;

    /// Whether any delivery for this key has been processed
    async fn find_processed(&self, business_key: &BusinessKey) -> Result<bool, StoreError>;

    /// Atomically claim `business_key` for `event_id` until `now + lease`
    ///
    /// An expired claim is treated as absent. A claim already held by
    /// `event_id` is renewed.
    async fn try_claim(
        &self,
        business_key: &BusinessKey,
        event_id: EventId,
        lease: Duration,
        now: Timestamp,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Drop a claim held by `event_id`; a claim held by anyone else is left alone
    async fn release_claim(
        &self,
        business_key: &BusinessKey,
        event_id: EventId,
    ) -> Result<(), StoreError>;

    /// Transition the key to processed, attributing it to `event_id`
    ///
    /// Returns `false` without modifying anything when the key was already
    /// processed. Clears any claim on the key.
    async fn mark_processed(
        &self,
        business_key: &BusinessKey,
        event_id: EventId,
        duration_ms: u64,
        processed_at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Apply bookkeeping changes to a stored record
    async fn update(&self, id: EventId, update: WebhookEventUpdate) -> Result<(), StoreError>;

    /// Records matching `filter`, newest first
    async fn list(&self, filter: &WebhookEventFilter) -> Result<Vec<WebhookEvent>, StoreError>;
}

// ============================================================================
// Security event store
// ============================================================================

/// Query over stored security events
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityEventFilter {
    pub event_type: Option<SecurityEventType>,
    pub severity: Option<Severity>,
    pub since: Option<Timestamp>,
    pub limit: usize,
}

impl Default for SecurityEventFilter {
    fn default() -> Self {
        Self {
            event_type: None,
            severity: None,
            since: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl SecurityEventFilter {
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        true
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

/// Counts of security events over a period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEventSummary {
    pub since: Timestamp,
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
}

impl SecurityEventSummary {
    /// Tally events recorded at or after `since`
    pub fn from_events<'a>(
        since: Timestamp,
        events: impl IntoIterator<Item = &'a SecurityEvent>,
    ) -> Self {
        let mut summary = Self {
            since,
            total: 0,
            by_type: BTreeMap::new(),
            by_severity: BTreeMap::new(),
        };

        for event in events.into_iter().filter(|e| e.timestamp >= since) {
            summary.total += 1;
            *summary
                .by_type
                .entry(event.event_type.as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .by_severity
                .entry(event.severity.as_str().to_string())
                .or_insert(0) += 1;
        }

        summary
    }
}

/// Append-only store of security events and validation decisions
#[async_trait]
pub trait SecurityEventStore: Send + Sync {
    async fn append(&self, event: SecurityEvent) -> Result<(), StoreError>;

    async fn append_decision(&self, decision: ValidationDecision) -> Result<(), StoreError>;

    /// Events matching `filter`, newest first
    async fn list(&self, filter: &SecurityEventFilter) -> Result<Vec<SecurityEvent>, StoreError>;

    async fn summary(&self, since: Timestamp) -> Result<SecurityEventSummary, StoreError>;
}

// ============================================================================
// Downstream mutation
// ============================================================================

/// The side-effecting payment-state change a processed webhook drives
///
/// Implementations are expected to be idempotent on the business key
/// themselves (upsert by key). The gate prevents concurrent duplicates but a
/// crash between the mutation and the processed mark can still cause a
/// second invocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentStatusMutator: Send + Sync {
    async fn apply_payment_status(
        &self,
        business_key: &BusinessKey,
        status: &str,
        amount: i64,
    ) -> Result<(), MutationError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from the persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Record not found: {id}")]
    NotFound { id: String },

    #[error("Duplicate record: {id}")]
    Duplicate { id: String },

    #[error("Store operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl StoreError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Errors from the downstream payment-state mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("Downstream temporarily unavailable: {message}")]
    Unavailable { message: String },

    #[error("Downstream rejected the change: {message}")]
    Rejected { message: String },

    #[error("Downstream call timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl MutationError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
