//! # Security Events
//!
//! Append-only record of every validation decision, accepted or rejected,
//! and of the security events raised by anomalous ones.
//!
//! Recording is a side channel: it must never turn a validation decision into
//! an error. When the backing store refuses a write the failure is raised
//! through an [`AlertNotifier`] instead, because a lost audit record is itself
//! a blind spot an operator needs to know about.

use crate::store::SecurityEventStore;
use crate::{EventId, ParseError, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

// ============================================================================
// Core Types
// ============================================================================

/// Unique identifier for a security event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecurityEventId(Ulid);

impl SecurityEventId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SecurityEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SecurityEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of anomaly a validation gate detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityEventType {
    InvalidSignature,
    TimestampExpired,
    ReplayDetected,
    RateLimitExceeded,
    IpBlocked,
    Anomalous,
}

impl SecurityEventType {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "invalid-signature",
            Self::TimestampExpired => "timestamp-expired",
            Self::ReplayDetected => "replay-detected",
            Self::RateLimitExceeded => "rate-limit-exceeded",
            Self::IpBlocked => "ip-blocked",
            Self::Anomalous => "anomalous",
        }
    }

    /// Severity recorded when the detecting gate has no reason to deviate
    ///
    /// Anomalies have no fixed severity; callers pick one per cause and this
    /// returns the medium fallback.
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::InvalidSignature => Severity::Critical,
            Self::TimestampExpired => Severity::High,
            Self::ReplayDetected => Severity::Critical,
            Self::RateLimitExceeded => Severity::Medium,
            Self::IpBlocked => Severity::High,
            Self::Anomalous => Severity::Medium,
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityEventType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid-signature" => Ok(Self::InvalidSignature),
            "timestamp-expired" => Ok(Self::TimestampExpired),
            "replay-detected" => Ok(Self::ReplayDetected),
            "rate-limit-exceeded" => Ok(Self::RateLimitExceeded),
            "ip-blocked" => Ok(Self::IpBlocked),
            "anomalous" => Ok(Self::Anomalous),
            other => Err(ParseError::InvalidFormat {
                expected: "security event type".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

/// Severity of a security event, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(ParseError::InvalidFormat {
                expected: "low, medium, high or critical".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

/// One detected anomaly with the context that triggered it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: SecurityEventId,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    /// Free-form context: source address, user agent, business key, cause
    pub details: BTreeMap<String, String>,
    /// Delivery that triggered the event, when one exists
    pub webhook_event_id: Option<EventId>,
    pub timestamp: Timestamp,
}

impl SecurityEvent {
    /// Create an event at the type's default severity
    pub fn new(event_type: SecurityEventType, timestamp: Timestamp) -> Self {
        Self {
            id: SecurityEventId::new(),
            event_type,
            severity: event_type.default_severity(),
            details: BTreeMap::new(),
            webhook_event_id: None,
            timestamp,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_webhook_event(mut self, webhook_event_id: EventId) -> Self {
        self.webhook_event_id = Some(webhook_event_id);
        self
    }
}

// ============================================================================
// Alerting
// ============================================================================

/// Channel for infrastructure failures that must reach an operator
///
/// Implementations must not block and must not fail; the pipeline calls this
/// from paths where there is nothing left to propagate an error to.
pub trait AlertNotifier: Send + Sync {
    /// Raise an alert for a failed operation in `component`
    fn notify(&self, component: &str, message: &str);
}

/// Alert notifier that emits a structured `error!` event tagged `alert = true`
///
/// Log shipping rules keyed on the tag turn these into pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertNotifier;

impl AlertNotifier for TracingAlertNotifier {
    fn notify(&self, component: &str, message: &str) {
        error!(alert = true, component = component, "{}", message);
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Terminal validation decision for one delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDecision {
    pub webhook_event_id: EventId,
    pub accepted: bool,
    /// Last stage passed
    pub stage: String,
    /// Rejection label; absent when accepted
    pub reason: Option<String>,
    pub source_ip: String,
    pub timestamp: Timestamp,
}

/// Writes security events and validation decisions to the store and the log
#[derive(Clone)]
pub struct SecurityEventRecorder {
    store: Arc<dyn SecurityEventStore>,
    alerts: Arc<dyn AlertNotifier>,
}

impl SecurityEventRecorder {
    pub fn new(store: Arc<dyn SecurityEventStore>, alerts: Arc<dyn AlertNotifier>) -> Self {
        Self { store, alerts }
    }

    /// Notifier used for persistence failures
    pub fn alerts(&self) -> Arc<dyn AlertNotifier> {
        self.alerts.clone()
    }

    /// Store backing this recorder
    pub fn store(&self) -> Arc<dyn SecurityEventStore> {
        self.store.clone()
    }

    /// Log and persist one event. Never fails.
    pub async fn record(&self, event: &SecurityEvent) {
        log_security_event(event);

        if let Err(e) = self.store.append(event.clone()).await {
            self.alerts.notify(
                "security_event_store",
                &format!(
                    "Failed to persist {} security event {}: {}",
                    event.event_type, event.id, e
                ),
            );
        }
    }

    /// Log and persist events in order
    pub async fn record_all(&self, events: &[SecurityEvent]) {
        for event in events {
            self.record(event).await;
        }
    }

    /// Log and persist the terminal decision for a delivery. Never fails.
    pub async fn record_decision(&self, decision: &ValidationDecision) {
        if decision.accepted {
            info!(
                webhook_event_id = %decision.webhook_event_id,
                stage = %decision.stage,
                source_ip = %decision.source_ip,
                "Validation decision recorded: accepted"
            );
        } else {
            warn!(
                webhook_event_id = %decision.webhook_event_id,
                stage = %decision.stage,
                reason = decision.reason.as_deref().unwrap_or("unknown"),
                source_ip = %decision.source_ip,
                "Validation decision recorded: rejected"
            );
        }

        if let Err(e) = self.store.append_decision(decision.clone()).await {
            self.alerts.notify(
                "security_event_store",
                &format!(
                    "Failed to persist validation decision for {}: {}",
                    decision.webhook_event_id, e
                ),
            );
        }
    }
}

impl fmt::Debug for SecurityEventRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityEventRecorder").finish_non_exhaustive()
    }
}

fn log_security_event(event: &SecurityEvent) {
    let webhook_event_id = event
        .webhook_event_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    let details = format!("{:?}", event.details);

    match event.severity {
        Severity::Critical => error!(
            security_event_id = %event.id,
            event_type = %event.event_type,
            severity = %event.severity,
            webhook_event_id = %webhook_event_id,
            details = %details,
            "Security event recorded"
        ),
        Severity::High => warn!(
            security_event_id = %event.id,
            event_type = %event.event_type,
            severity = %event.severity,
            webhook_event_id = %webhook_event_id,
            details = %details,
            "Security event recorded"
        ),
        Severity::Medium => info!(
            security_event_id = %event.id,
            event_type = %event.event_type,
            severity = %event.severity,
            webhook_event_id = %webhook_event_id,
            details = %details,
            "Security event recorded"
        ),
        Severity::Low => debug!(
            security_event_id = %event.id,
            event_type = %event.event_type,
            severity = %event.severity,
            webhook_event_id = %webhook_event_id,
            details = %details,
            "Security event recorded"
        ),
    }
}

#[cfg(test)]
#[path = "security_events_tests.rs"]
mod tests;
