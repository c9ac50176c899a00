//! # Payhook HTTP Service
//!
//! HTTP boundary for payment-gateway webhooks and the operator tooling around
//! them.
//!
//! This service provides:
//! - Webhook endpoint that acknowledges immediately and dispatches processing
//! - Health, readiness, and Prometheus metrics endpoints
//! - Admin API for inspecting and retrying stored deliveries
//!
//! The webhook handler performs only structural checks (transport, content
//! type, size, JSON well-formedness). Security validation and processing run
//! on the dispatcher's workers, and their outcome is never revealed to the
//! caller.

pub mod admin;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::{AdminConfig, LoggingConfig, ServerConfig, ServiceConfig, WebhookConfig};
pub use errors::{AdminError, ConfigError, ServiceError, WebhookHandlerError};
pub use metrics::ServiceMetrics;
pub use responses::*;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use payhook_core::{
    Clock, InboundWebhook, PipelineDependencies, PipelineObserver, RetryCoordinator,
    SecurityEventStore, Timestamp, WebhookDispatcher, WebhookEventStore, WebhookPipeline,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Recorded when the source address cannot be determined
pub const UNKNOWN_SOURCE: &str = "unknown";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<ServiceConfig>,

    /// Bounded queue in front of the validation pipeline
    pub dispatcher: Arc<WebhookDispatcher>,

    /// Operator retry entry point
    pub retry: RetryCoordinator,

    /// Stored deliveries
    pub webhook_store: Arc<dyn WebhookEventStore>,

    /// Recorded security events
    pub security_store: Arc<dyn SecurityEventStore>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,

    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Build the pipeline, start the dispatcher, and assemble the state
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the configuration is invalid or the
    /// metrics registry cannot be built.
    pub fn build(config: ServiceConfig, deps: PipelineDependencies) -> Result<Self, ServiceError> {
        config.validate()?;

        let metrics = ServiceMetrics::new()?;
        let webhook_store = deps.webhook_store.clone();
        let security_store = deps.security_store.clone();
        let clock = deps.clock.clone();

        let pipeline = Arc::new(
            WebhookPipeline::new(config.security.clone(), deps).map_err(ConfigError::from)?,
        );
        let retry = RetryCoordinator::from_pipeline(&pipeline);
        let observer: Arc<dyn PipelineObserver> = metrics.clone();
        let dispatcher = Arc::new(WebhookDispatcher::start(
            pipeline,
            config.webhooks.dispatcher_config(),
            Some(observer),
        ));

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            retry,
            webhook_store,
            security_store,
            metrics,
            clock,
        })
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let webhook_routes =
        Router::new().route(&state.config.webhooks.endpoint_path, post(handle_webhook));

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check))
        .route("/metrics", get(metrics_endpoint));

    let admin_routes = Router::new()
        .route("/admin/webhooks/events", get(admin::list_events))
        .route("/admin/webhooks/events/{event_id}", get(admin::get_event))
        .route(
            "/admin/webhooks/events/{event_id}/retry",
            post(admin::retry_event),
        )
        .route(
            "/admin/webhooks/security-events",
            get(admin::list_security_events),
        )
        .route(
            "/admin/webhooks/security-summary",
            get(admin::security_summary),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_internal_api_key,
        ));

    Router::new()
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain the dispatcher
///
/// # Errors
///
/// Returns [`ServiceError`] when the listener cannot be bound or the server fails.
pub async fn start_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServiceError> {
    let server = state.config.server.clone();
    let dispatcher = state.dispatcher.clone();
    let app = create_router(state);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: addr.clone(),
            message: e.to_string(),
        })?;

    info!("Starting HTTP server on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    // Stop intake and let queued deliveries finish, bounded by the shutdown timeout
    let drain_timeout = Duration::from_secs(server.shutdown_timeout_seconds);
    if tokio::time::timeout(drain_timeout, dispatcher.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_seconds = server.shutdown_timeout_seconds,
            queued = dispatcher.queued(),
            "Dispatcher did not drain before shutdown timeout"
        );
    }

    served.map_err(|e| ServiceError::ServerFailed {
        message: e.to_string(),
    })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

// ============================================================================
// Webhook Handler
// ============================================================================

/// Accept a payment webhook delivery
///
/// Runs the structural checks, hands the delivery to the dispatcher, and
/// acknowledges with the delivery id. A full dispatch queue answers `503`
/// with `Retry-After` so the gateway redelivers instead of the event being
/// dropped.
#[instrument(skip(state, request))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<WebhookAck>, WebhookHandlerError> {
    state.metrics.deliveries_received_total.inc();

    let (parts, body) = request.into_parts();
    let server = &state.config.server;

    if server.require_https && !is_https(&parts.headers) {
        return Err(WebhookHandlerError::InsecureTransport);
    }

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !is_json_content_type(content_type) {
        return Err(WebhookHandlerError::UnsupportedMediaType {
            content_type: content_type.to_string(),
        });
    }

    let bytes = axum::body::to_bytes(body, server.max_body_size)
        .await
        .map_err(|_| WebhookHandlerError::PayloadTooLarge {
            max_size: server.max_body_size,
        })?;

    let payload: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| WebhookHandlerError::InvalidPayload {
            message: e.to_string(),
        })?;
    if !payload.is_object() {
        return Err(WebhookHandlerError::InvalidPayload {
            message: "body must be a JSON object".to_string(),
        });
    }

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let source_ip = source_ip(&parts.headers, peer, server.trust_forwarded_for);
    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let inbound = InboundWebhook::new(payload, source_ip, user_agent, state.clock.now());
    let delivery_id = inbound.id;

    if let Err(e) = state.dispatcher.submit(inbound) {
        state.metrics.dispatch_rejections_total.inc();
        return Err(e.into());
    }

    info!(delivery_id = %delivery_id, "Webhook delivery accepted for processing");
    Ok(Json(WebhookAck {
        received: true,
        delivery_id,
    }))
}

/// Resolve the delivery's source address
///
/// With `trust_forwarded_for` the first `X-Forwarded-For` entry wins;
/// otherwise the socket peer address is used.
pub fn source_ip(headers: &HeaderMap, peer: Option<String>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    peer.unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

fn is_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

fn is_json_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

// ============================================================================
// Health and Metrics Handlers
// ============================================================================

/// Basic health check endpoint
async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Ready while the dispatcher accepts new deliveries
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let ready = state.dispatcher.is_accepting();
    let response = ReadinessResponse {
        ready,
        queued: state.dispatcher.queued(),
        capacity: state.dispatcher.capacity(),
        timestamp: Timestamp::now(),
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Prometheus text exposition
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    let queued = i64::try_from(state.dispatcher.queued()).unwrap_or(i64::MAX);
    state.metrics.dispatch_queue_depth.set(queued);

    state.metrics.render().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Uses the caller's `x-correlation-id` when present, otherwise generates one,
/// and echoes it on the response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(mut request: Request, next: middleware::Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
#[path = "test_support.rs"]
mod test_support;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
