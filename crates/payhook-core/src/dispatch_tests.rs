//! Tests for [`WebhookDispatcher`].

use super::*;
use crate::adapters::{
    InMemorySecurityEventStore, InMemoryWebhookEventStore, RecordingPaymentMutator,
};
use crate::config::{WebhookSecret, WebhookSecurityConfig};
use crate::pipeline::PipelineDependencies;
use crate::security_events::TracingAlertNotifier;
use crate::signature::compute_signature;
use crate::{Clock, ManualClock, Timestamp};
use serde_json::json;

const SECRET: &str = "dispatch-test-secret";
const START: &str = "2024-02-13T12:00:00Z";

#[derive(Default)]
struct RecordingObserver {
    labels: std::sync::Mutex<Vec<&'static str>>,
}

impl PipelineObserver for RecordingObserver {
    fn on_outcome(&self, outcome: &PipelineOutcome, _elapsed: Duration) {
        self.labels.lock().unwrap().push(outcome.label());
    }
}

fn pipeline(
    events: &InMemoryWebhookEventStore,
    mutator: &RecordingPaymentMutator,
    clock: &ManualClock,
) -> Arc<WebhookPipeline> {
    let config = WebhookSecurityConfig {
        shared_secret: Some(WebhookSecret::new(SECRET)),
        ..Default::default()
    };
    Arc::new(
        WebhookPipeline::new(
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
        .unwrap(),
    )
}

fn delivery(txn: &str, clock: &ManualClock) -> InboundWebhook {
    let mut payload = json!({
        "paymentKey": txn,
        "status": "DONE",
        "totalAmount": 1000,
        "requestedAt": START,
    });
    payload["signature"] = json!(compute_signature(&payload, &WebhookSecret::new(SECRET)));
    InboundWebhook::new(payload, "203.0.113.10", None, clock.now())
}

fn clock() -> ManualClock {
    ManualClock::new(Timestamp::from_rfc3339(START).unwrap())
}

mod dispatcher_tests {
    use super::*;

    #[tokio::test]
    async fn test_submitted_deliveries_are_processed_before_shutdown_returns() {
        let events = InMemoryWebhookEventStore::new();
        let mutator = RecordingPaymentMutator::new();
        let clock = clock();
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = WebhookDispatcher::start(
            pipeline(&events, &mutator, &clock),
            DispatcherConfig {
                queue_capacity: 16,
                workers: 2,
            },
            Some(observer.clone()),
        );

        for i in 0..5 {
            dispatcher
                .submit(delivery(&format!("txn-{}", i), &clock))
                .unwrap();
        }
        dispatcher.shutdown().await;

        assert_eq!(mutator.call_count(), 5);
        assert_eq!(events.len(), 5);
        let labels = observer.labels.lock().unwrap().clone();
        assert_eq!(labels, vec!["applied"; 5]);
    }

    #[tokio::test]
    async fn test_saturated_queue_refuses_instead_of_dropping() {
        let events = InMemoryWebhookEventStore::new();
        let mutator = RecordingPaymentMutator::new().with_latency(Duration::from_millis(100));
        let clock = clock();
        let dispatcher = WebhookDispatcher::start(
            pipeline(&events, &mutator, &clock),
            DispatcherConfig {
                queue_capacity: 1,
                workers: 1,
            },
            None,
        );

        let mut accepted = 0;
        let mut refused = 0;
        for i in 0..5 {
            match dispatcher.submit(delivery(&format!("txn-{}", i), &clock)) {
                Ok(()) => accepted += 1,
                Err(DispatchError::QueueFull { capacity }) => {
                    assert_eq!(capacity, 1);
                    refused += 1;
                }
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        dispatcher.shutdown().await;

        assert!(refused >= 1);
        assert_eq!(accepted + refused, 5);
        // Everything accepted was processed.
        assert_eq!(events.len(), accepted);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_closed() {
        let events = InMemoryWebhookEventStore::new();
        let mutator = RecordingPaymentMutator::new();
        let clock = clock();
        let dispatcher = WebhookDispatcher::start(
            pipeline(&events, &mutator, &clock),
            DispatcherConfig::default(),
            None,
        );
        assert!(dispatcher.is_accepting());

        dispatcher.shutdown().await;

        assert!(!dispatcher.is_accepting());
        assert_eq!(
            dispatcher.submit(delivery("txn-1", &clock)),
            Err(DispatchError::Closed)
        );
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn test_zero_sizing_is_raised_to_one() {
        let events = InMemoryWebhookEventStore::new();
        let mutator = RecordingPaymentMutator::new();
        let clock = clock();
        let dispatcher = WebhookDispatcher::start(
            pipeline(&events, &mutator, &clock),
            DispatcherConfig {
                queue_capacity: 0,
                workers: 0,
            },
            None,
        );

        assert_eq!(dispatcher.capacity(), 1);
        dispatcher.submit(delivery("txn-1", &clock)).unwrap();
        dispatcher.shutdown().await;
        assert_eq!(mutator.call_count(), 1);
    }

    #[test]
    fn test_queue_full_is_transient() {
        assert!(DispatchError::QueueFull { capacity: 1 }.is_transient());
        assert!(!DispatchError::Closed.is_transient());
    }
}
