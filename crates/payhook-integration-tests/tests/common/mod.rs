//! Common test utilities for payhook integration tests
//!
//! This module provides:
//! - A fully wired service over in-memory stores and a manual clock
//! - Signed payment payload builders acting as the gateway
//! - Request helpers for the webhook and admin surfaces

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, StatusCode},
    Router,
};
use payhook_api::{create_router, AppState, ServiceConfig};
use payhook_core::signature::compute_signature;
use payhook_core::{
    EventId, InMemorySecurityEventStore, InMemoryWebhookEventStore, ManualClock,
    PipelineDependencies, RecordingPaymentMutator, Timestamp, TracingAlertNotifier,
    WebhookSecret,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const GATEWAY_SECRET: &str = "integration-gateway-secret";
pub const ADMIN_KEY: &str = "integration-admin-key";
pub const GATEWAY_ADDR: &str = "198.51.100.20:51000";
pub const START: &str = "2024-02-13T12:00:00Z";

// ============================================================================
// Service harness
// ============================================================================

/// The HTTP service wired against in-memory collaborators
pub struct TestService {
    pub router: Router,
    pub state: AppState,
    pub events: InMemoryWebhookEventStore,
    pub security: InMemorySecurityEventStore,
    pub mutator: RecordingPaymentMutator,
    pub clock: ManualClock,
}

impl TestService {
    pub fn start(config: ServiceConfig) -> Self {
        Self::start_with_mutator(config, RecordingPaymentMutator::new())
    }

    pub fn start_with_mutator(config: ServiceConfig, mutator: RecordingPaymentMutator) -> Self {
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
        .expect("service should build from test configuration");

        Self {
            router: create_router(state.clone()),
            state,
            events,
            security,
            mutator,
            clock,
        }
    }

    /// POST a payload from the default gateway address
    pub async fn deliver(&self, payload: &Value) -> Response<Body> {
        self.deliver_from(GATEWAY_ADDR, payload).await
    }

    pub async fn deliver_from(&self, peer: &str, payload: &Value) -> Response<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhooks/payments")
            .header("content-type", "application/json")
            .header("user-agent", "PaymentGateway/1.0")
            .body(Body::from(payload.to_string()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));

        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Deliver and return the acknowledged delivery id
    pub async fn deliver_ok(&self, payload: &Value) -> EventId {
        let response = self.deliver(payload).await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["delivery_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap()
    }

    pub async fn admin(&self, method: &str, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-internal-api-key", ADMIN_KEY)
            .body(Body::empty())
            .unwrap();

        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Stop intake and wait for every queued delivery to finish processing
    pub async fn drain(&self) {
        self.state.dispatcher.shutdown().await;
    }
}

pub fn service_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.security.shared_secret = Some(WebhookSecret::new(GATEWAY_SECRET));
    config.admin.api_key = Some(ADMIN_KEY.to_string());
    config.webhooks.worker_count = 1;
    config
}

// ============================================================================
// Gateway payloads
// ============================================================================

/// Attach the gateway signature to `payload`
pub fn sign(mut payload: Value) -> Value {
    if let Some(object) = payload.as_object_mut() {
        object.remove("signature");
    }
    let signature = compute_signature(&payload, &WebhookSecret::new(GATEWAY_SECRET));
    payload["signature"] = json!(signature);
    payload
}

/// Signed payment notification stamped at the harness start time
pub fn payment(txn: &str, status: &str, amount: i64) -> Value {
    sign(json!({
        "paymentKey": txn,
        "orderId": format!("order-{}", txn),
        "status": status,
        "totalAmount": amount,
        "balanceAmount": amount,
        "requestedAt": START,
    }))
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
