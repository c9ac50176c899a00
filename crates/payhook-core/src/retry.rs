//! # Operator Retry
//!
//! Lets an operator resubmit a stored delivery whose processing failed. The
//! stored payload re-enters the pipeline at the [`IdempotencyGate`]; source,
//! rate, signature, and freshness gates are not re-run because the event
//! already passed them at receipt, and the secret may have rotated since.
//!
//! Retries never clear the processed flag. The outcome is recorded in the
//! event's retry bookkeeping (`retry_status`, `retry_count`, `last_retry_at`),
//! except when another delivery holds the key's claim: that retry leaves the
//! event untouched so it stays listed as failed until the holder finishes.

use crate::event::{PaymentWebhookPayload, RetryStatus, WebhookEvent};
use crate::idempotency::{IdempotencyGate, IdempotentOutcome};
use crate::pipeline::WebhookPipeline;
use crate::store::{StoreError, WebhookEventStore, WebhookEventUpdate};
use crate::{Clock, EventId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Result of one operator retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// The mutation ran and the key is now processed
    Processed { event_id: EventId, duration_ms: u64 },
    /// The business key was already processed; nothing ran
    AlreadyProcessed { event_id: EventId },
    /// Another delivery holds the key's claim; nothing ran and nothing was recorded
    InFlight { event_id: EventId },
    /// The mutation failed again; the key remains eligible
    Failed {
        event_id: EventId,
        message: String,
        transient: bool,
    },
}

impl RetryOutcome {
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Processed { event_id, .. }
            | Self::AlreadyProcessed { event_id }
            | Self::InFlight { event_id }
            | Self::Failed { event_id, .. } => *event_id,
        }
    }
}

/// Drives operator-initiated reprocessing of stored events
#[derive(Clone)]
pub struct RetryCoordinator {
    gate: IdempotencyGate,
    store: Arc<dyn WebhookEventStore>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl RetryCoordinator {
    pub fn new(
        gate: IdempotencyGate,
        store: Arc<dyn WebhookEventStore>,
        clock: Arc<dyn Clock>,
        max_retries: u32,
    ) -> Self {
        Self {
            gate,
            store,
            clock,
            max_retries,
        }
    }

    /// Coordinator sharing the pipeline's gate, store, and clock
    pub fn from_pipeline(pipeline: &WebhookPipeline) -> Self {
        Self::new(
            pipeline.gate().clone(),
            pipeline.webhook_store(),
            pipeline.clock(),
            pipeline.config().max_operator_retries,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Resubmit a stored event to the idempotency gate
    ///
    /// # Errors
    ///
    /// - [`RetryError::NotFound`] when no event has this id
    /// - [`RetryError::NotRetryable`] when the event never passed validation
    /// - [`RetryError::RetryLimitExceeded`] once the operator retry budget is spent
    /// - [`RetryError::InvalidPayload`] when the stored payload no longer parses
    /// - [`RetryError::Store`] when the event store is unavailable
    #[instrument(skip(self, event_id, requested_by), fields(event_id = %event_id, requested_by = %requested_by))]
    pub async fn retry(
        &self,
        event_id: EventId,
        requested_by: &str,
    ) -> Result<RetryOutcome, RetryError> {
        let event = self
            .store
            .get(event_id)
            .await?
            .ok_or(RetryError::NotFound { event_id })?;

        if !event.validation.valid {
            return Err(RetryError::NotRetryable {
                event_id,
                reason: event
                    .validation
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "event did not pass validation".to_string()),
            });
        }

        let business_key = event.business_key.clone().ok_or_else(|| RetryError::NotRetryable {
            event_id,
            reason: "event has no business key".to_string(),
        })?;

        if event.processed || self.store.find_processed(&business_key).await? {
            info!(business_key = %business_key, "Retry requested for already processed event");
            return Ok(RetryOutcome::AlreadyProcessed { event_id });
        }

        if event.retry_count >= self.max_retries {
            warn!(
                business_key = %business_key,
                retry_count = event.retry_count,
                max_retries = self.max_retries,
                "Operator retry limit reached"
            );
            return Err(RetryError::RetryLimitExceeded {
                event_id,
                attempts: event.retry_count,
                max: self.max_retries,
            });
        }

        let payload = parse_stored(&event)?;

        info!(business_key = %business_key, attempt = event.retry_count + 1, "Retrying event");
        let outcome = match self.gate.execute(event_id, &payload).await {
            IdempotentOutcome::Applied { duration_ms } => RetryOutcome::Processed {
                event_id,
                duration_ms,
            },
            IdempotentOutcome::Duplicate { in_flight: false } => {
                RetryOutcome::AlreadyProcessed { event_id }
            }
            IdempotentOutcome::Duplicate { in_flight: true } => {
                info!(business_key = %business_key, "Key is claimed by another delivery; retry not recorded");
                return Ok(RetryOutcome::InFlight { event_id });
            }
            IdempotentOutcome::Failed { message, transient } => RetryOutcome::Failed {
                event_id,
                message,
                transient,
            },
        };

        self.record(&event, &outcome).await;
        Ok(outcome)
    }

    async fn record(&self, event: &WebhookEvent, outcome: &RetryOutcome) {
        let attempts = event.retry_count.saturating_add(1);
        let now = self.clock.now();
        let update = match outcome {
            RetryOutcome::Processed { .. } | RetryOutcome::AlreadyProcessed { .. } => {
                WebhookEventUpdate::retry(RetryStatus::Retried, attempts, now)
                    .with_error_message(None)
            }
            RetryOutcome::Failed { message, .. } => {
                WebhookEventUpdate::retry(RetryStatus::RetryFailed, attempts, now)
                    .with_error_message(Some(message.clone()))
            }
            RetryOutcome::InFlight { .. } => return,
        };

        if let Err(e) = self.store.update(event.id, update).await {
            error!(event_id = %event.id, error = %e, "Failed to record retry outcome");
        }
    }
}

fn parse_stored(event: &WebhookEvent) -> Result<PaymentWebhookPayload, RetryError> {
    let payload =
        PaymentWebhookPayload::from_value(&event.payload).map_err(|e| RetryError::InvalidPayload {
            event_id: event.id,
            message: e.to_string(),
        })?;

    let key = payload
        .business_key()
        .map_err(|e| RetryError::InvalidPayload {
            event_id: event.id,
            message: e.to_string(),
        })?;
    if event.business_key.as_ref() != Some(&key) {
        return Err(RetryError::InvalidPayload {
            event_id: event.id,
            message: format!("stored payload reports {} but event is keyed otherwise", key),
        });
    }

    Ok(payload)
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Operator retry errors
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Webhook event not found: {event_id}")]
    NotFound { event_id: EventId },

    #[error("Webhook event {event_id} cannot be retried: {reason}")]
    NotRetryable { event_id: EventId, reason: String },

    #[error("Webhook event {event_id} reached the retry limit ({attempts}/{max})")]
    RetryLimitExceeded {
        event_id: EventId,
        attempts: u32,
        max: u32,
    },

    #[error("Stored payload for {event_id} is invalid: {message}")]
    InvalidPayload { event_id: EventId, message: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl RetryError {
    /// Check if error is transient and the retry request may be repeated
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::NotFound { .. }
            | Self::NotRetryable { .. }
            | Self::RetryLimitExceeded { .. }
            | Self::InvalidPayload { .. } => false,
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
