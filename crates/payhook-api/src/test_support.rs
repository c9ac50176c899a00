//! Shared fixtures for the HTTP layer tests.

use crate::{AppState, ServiceConfig};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response},
};
use payhook_core::signature::compute_signature;
use payhook_core::{
    InMemorySecurityEventStore, InMemoryWebhookEventStore, ManualClock, PipelineDependencies,
    RecordingPaymentMutator, Timestamp, TracingAlertNotifier, WebhookSecret,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

pub const SECRET: &str = "http-test-secret";
pub const API_KEY: &str = "ops-test-key";
pub const START: &str = "2024-02-13T12:00:00Z";
pub const PEER: &str = "203.0.113.10:44123";

pub struct TestApp {
    pub state: AppState,
    pub events: InMemoryWebhookEventStore,
    pub security: InMemorySecurityEventStore,
    pub mutator: RecordingPaymentMutator,
    pub clock: ManualClock,
}

impl TestApp {
    /// Wait until every queued delivery has been processed
    pub async fn drain(&self) {
        self.state.dispatcher.shutdown().await;
    }
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.security.shared_secret = Some(WebhookSecret::new(SECRET));
    config.admin.api_key = Some(API_KEY.to_string());
    config.webhooks.worker_count = 1;
    config
}

pub fn build(config: ServiceConfig) -> TestApp {
    build_with_mutator(config, RecordingPaymentMutator::new())
}

pub fn build_with_mutator(config: ServiceConfig, mutator: RecordingPaymentMutator) -> TestApp {
    let events = InMemoryWebhookEventStore::new();
    let security = InMemorySecurityEventStore::new();
    let clock = ManualClock::new(Timestamp::from_rfc3339(START).unwrap());

    let state = AppState::build(
        config,
        PipelineDependencies {
            webhook_store: Arc::new(events.clone()),
            security_store: Arc::new(security.clone()),
            mutator: Arc::new(mutator.clone()),
            clock: Arc::new(clock.clone()),
            alerts: Arc::new(TracingAlertNotifier),
            rate_limiter: None,
        },
    )
    .unwrap();

    TestApp {
        state,
        events,
        security,
        mutator,
        clock,
    }
}

pub fn signed_payload(txn: &str, status: &str, amount: i64) -> Value {
    let mut payload = json!({
        "paymentKey": txn,
        "orderId": format!("order-{}", txn),
        "status": status,
        "totalAmount": amount,
        "requestedAt": START,
    });
    payload["signature"] = json!(compute_signature(&payload, &WebhookSecret::new(SECRET)));
    payload
}

pub fn webhook_request(body: &Value) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("content-type", "application/json")
        .header("user-agent", "PaymentGateway/1.0")
        .body(Body::from(body.to_string()))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(PEER.parse::<SocketAddr>().unwrap()));
    request
}

pub fn admin_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-internal-api-key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
