use super::*;
use crate::adapters::InMemoryWebhookEventStore;
use crate::event::{InboundWebhook, WebhookEvent, WebhookEventValidation};
use crate::{ManualClock, Timestamp};
use serde_json::json;

fn payload() -> Value {
    json!({
        "paymentKey": "txn-123",
        "status": "paid",
        "totalAmount": 15000,
        "signature": "abc"
    })
}

fn key() -> BusinessKey {
    BusinessKey::new("txn-123", "paid").unwrap()
}

async fn store_delivery(
    store: &InMemoryWebhookEventStore,
    payload: Value,
    received_at: Timestamp,
    valid: bool,
) {
    let hash = payload_hash(&payload);
    let inbound = InboundWebhook::new(payload, "10.0.0.1", None, received_at);
    let record = WebhookEvent::from_inbound(
        &inbound,
        Some(key()),
        hash,
        WebhookEventValidation {
            valid,
            ..Default::default()
        },
    );
    store.insert(record).await.unwrap();
}

mod hash_tests {
    use super::*;

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = payload_hash(&payload());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"y":2,"x":1}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":{"x":1,"y":2},"a":1}"#).unwrap();
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_any_change_changes_hash() {
        let mut changed = payload();
        changed["metadata"] = json!({ "attempt": 2 });
        assert_ne!(payload_hash(&payload()), payload_hash(&changed));
    }
}

mod guard_tests {
    use super::*;

    fn guard(store: &InMemoryWebhookEventStore, clock: &ManualClock) -> ReplayGuard {
        ReplayGuard::new(Arc::new(store.clone()), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_first_delivery_is_not_replay() {
        let store = InMemoryWebhookEventStore::new();
        let clock = ManualClock::new(Timestamp::now());

        let replay = guard(&store, &clock)
            .is_replay(&key(), &payload_hash(&payload()), DEFAULT_LOOKBACK)
            .await
            .unwrap();
        assert!(!replay);
    }

    #[tokio::test]
    async fn test_identical_payload_within_window_is_replay() {
        let store = InMemoryWebhookEventStore::new();
        let clock = ManualClock::new(Timestamp::now());
        store_delivery(&store, payload(), clock.now(), true).await;

        clock.advance(Duration::from_secs(5));
        let replay = guard(&store, &clock)
            .is_replay(&key(), &payload_hash(&payload()), DEFAULT_LOOKBACK)
            .await
            .unwrap();
        assert!(replay);
    }

    #[tokio::test]
    async fn test_identical_payload_after_window_is_fresh() {
        let store = InMemoryWebhookEventStore::new();
        let clock = ManualClock::new(Timestamp::now());
        store_delivery(&store, payload(), clock.now(), true).await;

        clock.advance(DEFAULT_LOOKBACK + Duration::from_secs(1));
        let replay = guard(&store, &clock)
            .is_replay(&key(), &payload_hash(&payload()), DEFAULT_LOOKBACK)
            .await
            .unwrap();
        assert!(!replay);
    }

    #[tokio::test]
    async fn test_rejected_prior_delivery_does_not_count() {
        let store = InMemoryWebhookEventStore::new();
        let clock = ManualClock::new(Timestamp::now());
        store_delivery(&store, payload(), clock.now(), false).await;

        let replay = guard(&store, &clock)
            .is_replay(&key(), &payload_hash(&payload()), DEFAULT_LOOKBACK)
            .await
            .unwrap();
        assert!(!replay);
    }

    #[tokio::test]
    async fn test_changed_envelope_is_not_replay() {
        let store = InMemoryWebhookEventStore::new();
        let clock = ManualClock::new(Timestamp::now());
        store_delivery(&store, payload(), clock.now(), true).await;

        let mut resent = payload();
        resent["metadata"] = json!({ "attempt": 2 });
        let replay = guard(&store, &clock)
            .is_replay(&key(), &payload_hash(&resent), DEFAULT_LOOKBACK)
            .await
            .unwrap();
        assert!(!replay);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = InMemoryWebhookEventStore::new();
        let clock = ManualClock::new(Timestamp::now());
        store.set_offline(true);

        let result = guard(&store, &clock)
            .is_replay(&key(), "hash", DEFAULT_LOOKBACK)
            .await;
        assert!(result.is_err());
    }
}
