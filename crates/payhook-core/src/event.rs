//! # Webhook Event Records
//!
//! Types describing one inbound delivery attempt: what the transport hands
//! to the pipeline ([`InboundWebhook`]), the typed view of the gateway payload
//! ([`PaymentWebhookPayload`]), and the persisted record of the attempt and
//! its outcome ([`WebhookEvent`]).

use crate::{
    security_events::SecurityEvent, BusinessKey, EventId, Timestamp, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Inbound delivery
// ============================================================================

/// A delivery as received at the transport boundary
///
/// Only structural checks have been applied at this point; nothing about the
/// payload has been authenticated.
#[derive(Debug, Clone)]
pub struct InboundWebhook {
    pub id: EventId,
    pub payload: Value,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub received_at: Timestamp,
}

impl InboundWebhook {
    /// Create new inbound delivery with a fresh identifier
    pub fn new(
        payload: Value,
        source_ip: impl Into<String>,
        user_agent: Option<String>,
        received_at: Timestamp,
    ) -> Self {
        Self {
            id: EventId::new(),
            payload,
            source_ip: source_ip.into(),
            user_agent,
            received_at,
        }
    }
}

// ============================================================================
// Gateway payload
// ============================================================================

/// Payload field carrying the gateway transaction identifier
pub const FIELD_TRANSACTION_ID: &str = "paymentKey";
/// Payload field carrying the merchant order identifier
pub const FIELD_ORDER_ID: &str = "orderId";
/// Payload field carrying the reported payment status
pub const FIELD_STATUS: &str = "status";
/// Payload field carrying the total amount
pub const FIELD_TOTAL_AMOUNT: &str = "totalAmount";
/// Payload field carrying the remaining balance
pub const FIELD_BALANCE_AMOUNT: &str = "balanceAmount";
/// Payload field carrying the time the payment was requested
pub const FIELD_REQUESTED_AT: &str = "requestedAt";
/// Payload field carrying the time the payment was approved
pub const FIELD_APPROVED_AT: &str = "approvedAt";
/// Payload field carrying the sender's HMAC signature
pub const FIELD_SIGNATURE: &str = "signature";

/// Typed view over a payment-status webhook body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentWebhookPayload {
    pub transaction_id: String,
    pub order_id: Option<String>,
    pub status: String,
    pub total_amount: i64,
    pub balance_amount: Option<i64>,
    pub requested_at: Option<String>,
    pub approved_at: Option<String>,
    pub signature: Option<String>,
}

impl PaymentWebhookPayload {
    /// Extract the typed fields from a raw JSON body
    ///
    /// The raw value is not modified. Unknown fields are ignored here but
    /// remain in the stored payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the body is not an object, or when the
    /// transaction identifier, status, or total amount is missing or has the
    /// wrong type.
    pub fn from_value(payload: &Value) -> Result<Self, ValidationError> {
        let object = payload
            .as_object()
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "payload".to_string(),
                message: "must be a JSON object".to_string(),
            })?;

        let transaction_id = required_string(object, FIELD_TRANSACTION_ID)?;
        let status = required_string(object, FIELD_STATUS)?;

        let total_amount = match object.get(FIELD_TOTAL_AMOUNT) {
            Some(value) => amount(value, FIELD_TOTAL_AMOUNT)?,
            None => {
                return Err(ValidationError::Required {
                    field: FIELD_TOTAL_AMOUNT.to_string(),
                })
            }
        };

        let balance_amount = match object.get(FIELD_BALANCE_AMOUNT) {
            Some(Value::Null) | None => None,
            Some(value) => Some(amount(value, FIELD_BALANCE_AMOUNT)?),
        };

        Ok(Self {
            transaction_id,
            order_id: optional_string(object, FIELD_ORDER_ID),
            status,
            total_amount,
            balance_amount,
            requested_at: optional_string(object, FIELD_REQUESTED_AT),
            approved_at: optional_string(object, FIELD_APPROVED_AT),
            signature: optional_string(object, FIELD_SIGNATURE),
        })
    }

    /// Business key identifying the payment event this payload reports
    pub fn business_key(&self) -> Result<BusinessKey, ValidationError> {
        BusinessKey::new(self.transaction_id.clone(), self.status.clone())
    }

    /// Timestamp used for the freshness check
    ///
    /// The request time is what the gateway stamps on every status change;
    /// the approval time is only present once a payment completes.
    pub fn declared_timestamp(&self) -> Option<&str> {
        self.requested_at
            .as_deref()
            .or(self.approved_at.as_deref())
    }
}

fn required_string(
    object: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, ValidationError> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | None | Some(Value::Null) => Err(ValidationError::Required {
            field: field.to_string(),
        }),
        Some(_) => Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "must be a string".to_string(),
        }),
    }
}

fn optional_string(object: &serde_json::Map<String, Value>, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn amount(value: &Value, field: &str) -> Result<i64, ValidationError> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "must be an integer amount".to_string(),
        }),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "must be an integer amount".to_string(),
        }),
        _ => Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "must be an integer amount".to_string(),
        }),
    }
}

// ============================================================================
// Persisted record
// ============================================================================

/// Outcome of the validation gauntlet for one delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WebhookEventValidation {
    pub valid: bool,
    pub failure_reason: Option<String>,
    pub security_events: Vec<SecurityEvent>,
}

/// Status of the most recent operator-initiated retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Retried,
    RetryFailed,
}

impl RetryStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retried => "retried",
            Self::RetryFailed => "retry_failed",
        }
    }
}

/// One delivery attempt and everything learned about it
///
/// Owned by the persistence layer once written. `processed` moves from false
/// to true at most once per business key; the record is history after that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: EventId,
    /// Absent when the payload could not be parsed
    pub business_key: Option<BusinessKey>,
    pub payload: Value,
    pub payload_hash: String,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub received_at: Timestamp,
    pub validation: WebhookEventValidation,
    pub processed: bool,
    pub processed_at: Option<Timestamp>,
    pub processing_duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub retry_status: Option<RetryStatus>,
    pub retry_count: u32,
    pub last_retry_at: Option<Timestamp>,
}

impl WebhookEvent {
    /// Build the record for an inbound delivery before any processing
    pub fn from_inbound(
        inbound: &InboundWebhook,
        business_key: Option<BusinessKey>,
        payload_hash: String,
        validation: WebhookEventValidation,
    ) -> Self {
        Self {
            id: inbound.id,
            business_key,
            payload: inbound.payload.clone(),
            payload_hash,
            source_ip: inbound.source_ip.clone(),
            user_agent: inbound.user_agent.clone(),
            received_at: inbound.received_at,
            validation,
            processed: false,
            processed_at: None,
            processing_duration_ms: None,
            error_message: None,
            retry_status: None,
            retry_count: 0,
            last_retry_at: None,
        }
    }

    /// Passed validation but processing has not completed
    pub fn is_failed(&self) -> bool {
        self.validation.valid && !self.processed && self.error_message.is_some()
    }

    /// Carries any security event at high or critical severity
    pub fn is_suspicious(&self) -> bool {
        self.validation
            .security_events
            .iter()
            .any(|e| e.severity >= crate::security_events::Severity::High)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
