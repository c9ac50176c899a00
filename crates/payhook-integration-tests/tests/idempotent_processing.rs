//! Integration tests for exactly-once processing, operator retry, and
//! dispatch backpressure.

mod common;

use axum::http::StatusCode;
use common::{json_body, payment, service_config, sign, TestService};
use payhook_core::{MutationError, RecordingPaymentMutator, WebhookEventStore};
use serde_json::json;
use std::time::Duration;

/// Same business event, different envelope, so the replay gate passes it
fn redelivery(txn: &str, status: &str, attempt: u32) -> serde_json::Value {
    sign(json!({
        "paymentKey": txn,
        "orderId": format!("order-{}", txn),
        "status": status,
        "totalAmount": 15000,
        "requestedAt": common::START,
        "approvedAt": format!("2024-02-13T12:00:0{}Z", attempt),
    }))
}

// ============================================================================
// Exactly-once
// ============================================================================

#[tokio::test]
async fn test_concurrent_redeliveries_apply_once() {
    let mut config = service_config();
    config.webhooks.worker_count = 4;
    let service = TestService::start_with_mutator(
        config,
        RecordingPaymentMutator::new().with_latency(Duration::from_millis(50)),
    );

    for attempt in 0..4 {
        service
            .deliver_ok(&redelivery("txn-123", "DONE", attempt))
            .await;
    }
    service.drain().await;

    assert_eq!(service.mutator.call_count(), 1);
    assert!(service.security.snapshot().is_empty());
    assert_eq!(service.events.len(), 4);
}

#[tokio::test]
async fn test_status_transitions_each_apply() {
    let service = TestService::start(service_config());

    service.deliver_ok(&payment("txn-123", "READY", 15000)).await;
    service.deliver_ok(&payment("txn-123", "DONE", 15000)).await;
    service.drain().await;

    let statuses: Vec<String> = service
        .mutator
        .applied()
        .into_iter()
        .map(|m| m.status)
        .collect();
    assert_eq!(statuses, vec!["READY".to_string(), "DONE".to_string()]);
}

// ============================================================================
// Operator retry
// ============================================================================

#[tokio::test]
async fn test_failed_processing_recovered_by_operator_retry() {
    let service = TestService::start(service_config());
    service.mutator.fail_next(MutationError::Unavailable {
        message: "ledger offline".to_string(),
    });

    let event_id = service.deliver_ok(&payment("txn-9", "DONE", 500)).await;
    service.drain().await;

    let failed = json_body(
        service
            .admin("GET", "/admin/webhooks/events?status=failed")
            .await,
    )
    .await;
    assert_eq!(failed["count"], 1);
    assert_eq!(failed["events"][0]["id"], event_id.to_string());

    let retry_uri = format!("/admin/webhooks/events/{}/retry", event_id);
    let first = service.admin("POST", &retry_uri).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(json_body(first).await["result"]["outcome"], "processed");

    let second = service.admin("POST", &retry_uri).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        json_body(second).await["result"]["outcome"],
        "already_processed"
    );

    assert_eq!(service.mutator.applied().len(), 1);
    let stored = service.events.get(event_id).await.unwrap().unwrap();
    assert!(stored.processed);
    assert_eq!(stored.retry_count, 1);
}

#[tokio::test]
async fn test_retry_stops_at_configured_limit() {
    let mut config = service_config();
    config.security.max_operator_retries = 1;
    let service = TestService::start(config);
    for _ in 0..2 {
        service.mutator.fail_next(MutationError::Unavailable {
            message: "ledger offline".to_string(),
        });
    }

    let event_id = service.deliver_ok(&payment("txn-9", "DONE", 500)).await;
    service.drain().await;

    let retry_uri = format!("/admin/webhooks/events/{}/retry", event_id);
    let first = service.admin("POST", &retry_uri).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(json_body(first).await["result"]["outcome"], "failed");

    let second = service.admin("POST", &retry_uri).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(service.mutator.call_count(), 2);
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_saturated_dispatcher_asks_gateway_to_redeliver() {
    let mut config = service_config();
    config.webhooks.queue_capacity = 1;
    let service = TestService::start_with_mutator(
        config,
        RecordingPaymentMutator::new().with_latency(Duration::from_millis(200)),
    );

    let mut accepted = 0;
    let mut refused = 0;
    for i in 0..5 {
        let response = service
            .deliver(&payment(&format!("txn-{}", i), "DONE", 100))
            .await;
        match response.status() {
            StatusCode::OK => accepted += 1,
            StatusCode::SERVICE_UNAVAILABLE => {
                assert_eq!(response.headers().get("Retry-After").unwrap(), "5");
                refused += 1;
            }
            other => panic!("unexpected status {}", other),
        }
    }
    service.drain().await;

    assert!(refused >= 1);
    assert_eq!(service.events.len(), accepted);
    assert_eq!(service.mutator.call_count(), accepted);
}
