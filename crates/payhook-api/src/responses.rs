//! Response types and query parameters for the API.

use payhook_core::{
    BusinessKey, EventId, RetryOutcome, RetryStatus, SecurityEvent, Timestamp, WebhookEvent,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Response Types
// ============================================================================

/// Acknowledgement returned for every accepted delivery
///
/// Says nothing about whether the delivery will pass validation.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    pub delivery_id: EventId,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub version: String,
}

/// Readiness check response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub queued: usize,
    pub capacity: usize,
    pub timestamp: Timestamp,
}

/// Stored event list response
#[derive(Debug, Serialize, Deserialize)]
pub struct EventListResponse {
    pub events: Vec<EventSummary>,
    pub count: usize,
}

/// Stored event detail response
#[derive(Debug, Serialize, Deserialize)]
pub struct EventDetailResponse {
    pub event: WebhookEvent,
}

/// Operator retry response
#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResponse {
    pub requested_by: String,
    pub result: RetryOutcome,
}

/// Security event list response
#[derive(Debug, Serialize, Deserialize)]
pub struct SecurityEventListResponse {
    pub events: Vec<SecurityEvent>,
    pub count: usize,
}

// ============================================================================
// Query Parameters
// ============================================================================

/// Stored event list query parameters
#[derive(Debug, Default, Deserialize)]
pub struct EventListParams {
    /// `failed`, `rejected`, `processed`, or `suspicious`
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Security event list query parameters
#[derive(Debug, Default, Deserialize)]
pub struct SecurityEventListParams {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<usize>,
}

/// Security summary query parameters
#[derive(Debug, Default, Deserialize)]
pub struct SummaryParams {
    /// Window in hours, default 24
    pub hours: Option<u64>,
}

// ============================================================================
// Supporting Types
// ============================================================================

/// Compact view of a stored delivery
#[derive(Debug, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: EventId,
    pub business_key: Option<BusinessKey>,
    pub source_ip: String,
    pub received_at: Timestamp,
    pub valid: bool,
    pub failure_reason: Option<String>,
    pub processed: bool,
    pub processed_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub retry_status: Option<RetryStatus>,
    pub retry_count: u32,
    pub suspicious: bool,
}

impl From<&WebhookEvent> for EventSummary {
    fn from(event: &WebhookEvent) -> Self {
        Self {
            id: event.id,
            business_key: event.business_key.clone(),
            source_ip: event.source_ip.clone(),
            received_at: event.received_at,
            valid: event.validation.valid,
            failure_reason: event.validation.failure_reason.clone(),
            processed: event.processed,
            processed_at: event.processed_at,
            error_message: event.error_message.clone(),
            retry_status: event.retry_status,
            retry_count: event.retry_count,
            suspicious: event.is_suspicious(),
        }
    }
}
