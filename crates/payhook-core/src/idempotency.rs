//! # Idempotent Processing
//!
//! Guarantees the downstream payment-state mutation runs at most once per
//! business key, even under concurrent or repeated delivery.
//!
//! ## Sequence
//!
//! 1. Atomically claim the key in the store ([`WebhookEventStore::try_claim`])
//! 2. Invoke the mutator under a bounded timeout
//! 3. On success, mark the key processed (this also drops the claim)
//! 4. On failure, release the claim and record the error on the event
//!
//! A key that is already processed, or claimed by another in-flight
//! delivery, is a successful no-op duplicate.
//!
//! A crash between steps 2 and 3 leaves the key unprocessed, so a later
//! delivery may invoke the mutator again. The mutator is expected to be
//! idempotent on the business key to cover that window.

use crate::event::PaymentWebhookPayload;
use crate::security_events::AlertNotifier;
use crate::store::{
    ClaimOutcome, MutationError, PaymentStatusMutator, StoreError, WebhookEventStore,
    WebhookEventUpdate,
};
use crate::{BusinessKey, Clock, EventId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Result of passing one event through the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotentOutcome {
    /// The mutation ran and the key is now processed
    Applied { duration_ms: u64 },
    /// The key was already processed or is being processed; nothing ran
    Duplicate { in_flight: bool },
    /// The mutation did not complete; the key remains eligible for processing
    Failed { message: String, transient: bool },
}

impl IdempotentOutcome {
    /// Whether the caller should treat this as a successful acknowledgement
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// At-most-once gate in front of the payment mutator
#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn WebhookEventStore>,
    mutator: Arc<dyn PaymentStatusMutator>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertNotifier>,
    claim_lease: Duration,
    downstream_timeout: Duration,
}

impl IdempotencyGate {
    pub fn new(
        store: Arc<dyn WebhookEventStore>,
        mutator: Arc<dyn PaymentStatusMutator>,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertNotifier>,
        claim_lease: Duration,
        downstream_timeout: Duration,
    ) -> Self {
        Self {
            store,
            mutator,
            clock,
            alerts,
            claim_lease,
            downstream_timeout,
        }
    }

    /// Whether no delivery for this key has been processed yet
    ///
    /// Advisory only; [`Self::execute`] does not rely on it.
    pub async fn should_process(&self, business_key: &BusinessKey) -> Result<bool, StoreError> {
        Ok(!self.store.find_processed(business_key).await?)
    }

    /// Mark the key processed by `event_id`
    ///
    /// Returns `false` when another delivery already holds the processed mark.
    pub async fn mark_processed(
        &self,
        business_key: &BusinessKey,
        event_id: EventId,
        duration: Duration,
    ) -> Result<bool, StoreError> {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.store
            .mark_processed(business_key, event_id, duration_ms, self.clock.now())
            .await
    }

    /// Run the payment mutation for `payload` unless its key was already handled
    #[instrument(skip(self, event_id, payload), fields(event_id = %event_id, transaction_id = %payload.transaction_id, status = %payload.status))]
    pub async fn execute(
        &self,
        event_id: EventId,
        payload: &PaymentWebhookPayload,
    ) -> IdempotentOutcome {
        let business_key = match payload.business_key() {
            Ok(key) => key,
            Err(e) => {
                return self
                    .record_failure(event_id, format!("Invalid business key: {}", e), false)
                    .await
            }
        };

        let started = self.clock.now();
        let claim = self
            .store
            .try_claim(&business_key, event_id, self.claim_lease, started)
            .await;

        match claim {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyProcessed) => {
                info!(business_key = %business_key, "Duplicate delivery of processed event; skipping mutation");
                return IdempotentOutcome::Duplicate { in_flight: false };
            }
            Ok(ClaimOutcome::InFlight { holder }) => {
                info!(
                    business_key = %business_key,
                    holder = %holder,
                    "Event is being processed by another delivery; skipping mutation"
                );
                return IdempotentOutcome::Duplicate { in_flight: true };
            }
            Err(e) => {
                self.alerts.notify(
                    "webhook_event_store",
                    &format!("Failed to claim {} for processing: {}", business_key, e),
                );
                return self
                    .record_failure(event_id, format!("Claim failed: {}", e), e.is_transient())
                    .await;
            }
        }

        let mutation = tokio::time::timeout(
            self.downstream_timeout,
            self.mutator.apply_payment_status(
                &business_key,
                &payload.status,
                payload.total_amount,
            ),
        )
        .await
        .unwrap_or(Err(MutationError::Timeout {
            duration: self.downstream_timeout,
        }));

        if let Err(e) = mutation {
            warn!(business_key = %business_key, error = %e, "Payment status mutation failed");
            self.release(&business_key, event_id).await;
            return self
                .record_failure(event_id, e.to_string(), e.is_transient())
                .await;
        }

        let finished = self.clock.now();
        let duration = finished.duration_since(started);
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        match self
            .store
            .mark_processed(&business_key, event_id, duration_ms, finished)
            .await
        {
            Ok(true) => {
                info!(business_key = %business_key, duration_ms = duration_ms, "Payment event processed");
                IdempotentOutcome::Applied { duration_ms }
            }
            Ok(false) => {
                // Another delivery took the claim over while this mutation ran,
                // so the payment status was applied more than once.
                error!(
                    business_key = %business_key,
                    duration_ms = duration_ms,
                    "Key was marked processed by another delivery after this mutation ran"
                );
                self.alerts.notify(
                    "idempotency_gate",
                    &format!(
                        "Duplicate mutation for {}: claim lapsed after {}ms and another delivery marked the key processed",
                        business_key, duration_ms
                    ),
                );
                IdempotentOutcome::Applied { duration_ms }
            }
            Err(e) => {
                error!(business_key = %business_key, error = %e, "Mutation applied but processed mark failed");
                self.alerts.notify(
                    "webhook_event_store",
                    &format!(
                        "Mutation for {} applied but could not be marked processed: {}",
                        business_key, e
                    ),
                );
                self.release(&business_key, event_id).await;
                self.record_failure(
                    event_id,
                    format!("Mutation applied but processed mark failed: {}", e),
                    true,
                )
                .await
            }
        }
    }

    async fn release(&self, business_key: &BusinessKey, event_id: EventId) {
        if let Err(e) = self.store.release_claim(business_key, event_id).await {
            self.alerts.notify(
                "webhook_event_store",
                &format!("Failed to release claim on {}: {}", business_key, e),
            );
        }
    }

    async fn record_failure(
        &self,
        event_id: EventId,
        message: String,
        transient: bool,
    ) -> IdempotentOutcome {
        if let Err(e) = self
            .store
            .update(event_id, WebhookEventUpdate::error(message.clone()))
            .await
        {
            self.alerts.notify(
                "webhook_event_store",
                &format!("Failed to record processing error on {}: {}", event_id, e),
            );
        }
        IdempotentOutcome::Failed { message, transient }
    }
}

impl std::fmt::Debug for IdempotencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGate")
            .field("claim_lease", &self.claim_lease)
            .field("downstream_timeout", &self.downstream_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "idempotency_tests.rs"]
mod tests;
