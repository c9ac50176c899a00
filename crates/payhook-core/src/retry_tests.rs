//! Tests for [`RetryCoordinator`].

use super::*;
use crate::adapters::{
    InMemorySecurityEventStore, InMemoryWebhookEventStore, RecordingPaymentMutator,
};
use crate::config::{WebhookSecret, WebhookSecurityConfig};
use crate::event::InboundWebhook;
use crate::pipeline::{PipelineDependencies, PipelineOutcome};
use crate::security_events::TracingAlertNotifier;
use crate::signature::compute_signature;
use crate::store::MutationError;
use crate::{ManualClock, Timestamp};
use serde_json::json;
use std::time::Duration;

const SECRET: &str = "retry-test-secret";
const START: &str = "2024-02-13T12:00:00Z";

struct Fixture {
    pipeline: WebhookPipeline,
    coordinator: RetryCoordinator,
    events: InMemoryWebhookEventStore,
    mutator: RecordingPaymentMutator,
    clock: ManualClock,
}

fn fixture(max_operator_retries: u32) -> Fixture {
    let events = InMemoryWebhookEventStore::new();
    let mutator = RecordingPaymentMutator::new();
    let clock = ManualClock::new(Timestamp::from_rfc3339(START).unwrap());
    let config = WebhookSecurityConfig {
        shared_secret: Some(WebhookSecret::new(SECRET)),
        max_operator_retries,
        ..Default::default()
    };

    let pipeline = WebhookPipeline::new(
        config,
        PipelineDependencies {
            webhook_store: Arc::new(events.clone()),
            security_store: Arc::new(InMemorySecurityEventStore::new()),
            mutator: Arc::new(mutator.clone()),
            clock: Arc::new(clock.clone()),
            alerts: Arc::new(TracingAlertNotifier),
            rate_limiter: None,
        },
    )
    .unwrap();
    let coordinator = RetryCoordinator::from_pipeline(&pipeline);

    Fixture {
        pipeline,
        coordinator,
        events,
        mutator,
        clock,
    }
}

impl Fixture {
    async fn deliver(&self, payload: serde_json::Value) -> PipelineOutcome {
        let inbound = InboundWebhook::new(
            payload,
            "203.0.113.10",
            Some("PaymentGateway/1.0".to_string()),
            self.clock.now(),
        );
        self.pipeline.process(inbound).await
    }

    async fn deliver_failing(&self, txn: &str) -> EventId {
        self.mutator.fail_next(MutationError::Unavailable {
            message: "ledger down".to_string(),
        });
        let outcome = self.deliver(signed(txn, 15000)).await;
        assert!(matches!(
            outcome,
            PipelineOutcome::Accepted {
                processing: IdempotentOutcome::Failed { .. },
                ..
            }
        ));
        outcome.event_id()
    }
}

fn signed(txn: &str, amount: i64) -> serde_json::Value {
    let mut payload = json!({
        "paymentKey": txn,
        "status": "DONE",
        "totalAmount": amount,
        "requestedAt": START,
    });
    let signature = compute_signature(&payload, &WebhookSecret::new(SECRET));
    payload["signature"] = json!(signature);
    payload
}

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_of_failed_event_applies_mutation() {
        let f = fixture(5);
        let event_id = f.deliver_failing("txn-1").await;
        f.clock.advance(Duration::from_secs(30));

        let outcome = f.coordinator.retry(event_id, "ops@example.com").await.unwrap();

        assert!(matches!(outcome, RetryOutcome::Processed { .. }));
        assert_eq!(f.mutator.applied().len(), 1);

        let stored = f.events.get(event_id).await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.retry_status, Some(RetryStatus::Retried));
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.last_retry_at, Some(f.clock.now()));
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_retry_that_fails_again_records_retry_failed() {
        let f = fixture(5);
        let event_id = f.deliver_failing("txn-1").await;
        f.mutator.fail_next(MutationError::Rejected {
            message: "account frozen".to_string(),
        });

        let outcome = f.coordinator.retry(event_id, "ops").await.unwrap();

        assert!(matches!(
            outcome,
            RetryOutcome::Failed {
                transient: false,
                ..
            }
        ));
        let stored = f.events.get(event_id).await.unwrap().unwrap();
        assert!(!stored.processed);
        assert_eq!(stored.retry_status, Some(RetryStatus::RetryFailed));
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error_message.unwrap().contains("account frozen"));
    }

    #[tokio::test]
    async fn test_retry_of_processed_event_is_noop() {
        let f = fixture(5);
        let outcome = f.deliver(signed("txn-1", 15000)).await;

        let retried = f.coordinator.retry(outcome.event_id(), "ops").await.unwrap();

        assert_eq!(
            retried,
            RetryOutcome::AlreadyProcessed {
                event_id: outcome.event_id()
            }
        );
        assert_eq!(f.mutator.call_count(), 1);
        let stored = f.events.get(outcome.event_id()).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_retry_after_key_processed_by_redelivery_is_noop() {
        let f = fixture(5);
        let failed = f.deliver_failing("txn-1").await;

        let mut redelivery = signed("txn-1", 15000);
        redelivery["metadata"] = json!({ "attempt": 2 });
        f.deliver(redelivery).await;
        assert_eq!(f.mutator.applied().len(), 1);

        let outcome = f.coordinator.retry(failed, "ops").await.unwrap();
        assert!(matches!(outcome, RetryOutcome::AlreadyProcessed { .. }));
        assert_eq!(f.mutator.applied().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_while_key_claimed_elsewhere_leaves_event_failed() {
        let f = fixture(5);
        let failed = f.deliver_failing("txn-1").await;
        let key = f
            .events
            .get(failed)
            .await
            .unwrap()
            .unwrap()
            .business_key
            .unwrap();
        let holder = EventId::new();
        f.events
            .try_claim(&key, holder, Duration::from_secs(60), f.clock.now())
            .await
            .unwrap();

        let outcome = f.coordinator.retry(failed, "ops").await.unwrap();

        assert_eq!(outcome, RetryOutcome::InFlight { event_id: failed });
        assert_eq!(f.mutator.call_count(), 1);
        let stored = f.events.get(failed).await.unwrap().unwrap();
        assert_eq!(stored.retry_status, None);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.error_message.is_some());
        assert!(stored.is_failed());

        f.events.release_claim(&key, holder).await.unwrap();
        assert!(f.events.get(failed).await.unwrap().unwrap().is_failed());
    }

    #[tokio::test]
    async fn test_rejected_event_is_not_retryable() {
        let f = fixture(5);
        let mut payload = signed("txn-1", 15000);
        payload["signature"] = json!("bad");
        let outcome = f.deliver(payload).await;

        let err = f.coordinator.retry(outcome.event_id(), "ops").await.unwrap_err();

        assert!(matches!(err, RetryError::NotRetryable { .. }));
        assert!(!err.is_transient());
        assert_eq!(f.mutator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_event_not_found() {
        let f = fixture(5);
        let err = f.coordinator.retry(EventId::new(), "ops").await.unwrap_err();
        assert!(matches!(err, RetryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_retry_limit_is_enforced() {
        let f = fixture(2);
        let event_id = f.deliver_failing("txn-1").await;

        for _ in 0..2 {
            f.mutator.fail_next(MutationError::Unavailable {
                message: "still down".to_string(),
            });
            let outcome = f.coordinator.retry(event_id, "ops").await.unwrap();
            assert!(matches!(outcome, RetryOutcome::Failed { .. }));
        }

        let err = f.coordinator.retry(event_id, "ops").await.unwrap_err();
        assert!(matches!(
            err,
            RetryError::RetryLimitExceeded {
                attempts: 2,
                max: 2,
                ..
            }
        ));
        assert_eq!(f.mutator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_store_outage_is_transient_error() {
        let f = fixture(5);
        let event_id = f.deliver_failing("txn-1").await;
        f.events.set_offline(true);

        let err = f.coordinator.retry(event_id, "ops").await.unwrap_err();

        assert!(matches!(err, RetryError::Store(_)));
        assert!(err.is_transient());
    }
}
