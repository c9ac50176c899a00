//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use payhook_core::{DispatchError, RetryError, StoreError};
use tracing::{error, warn};

/// Retry-After hint when the dispatch queue is saturated
const QUEUE_FULL_RETRY_SECONDS: u64 = 5;

/// Retry-After hint when a backing store or the dispatcher is unavailable
const UNAVAILABLE_RETRY_SECONDS: u64 = 30;

/// Webhook intake errors with HTTP status code mapping
///
/// Only structural problems with the delivery and backpressure surface here.
/// Validation outcomes are never reported to the caller.
///
/// - `400 Bad Request`: not HTTPS when required, or the body is not a JSON object
/// - `413 Payload Too Large`: body exceeds the configured limit
/// - `415 Unsupported Media Type`: content type is not JSON
/// - `503 Service Unavailable`: dispatch queue full or shut down (retryable)
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    #[error("Webhook deliveries must use HTTPS")]
    InsecureTransport,

    #[error("Unsupported content type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    #[error("Payload too large (max: {max_size} bytes)")]
    PayloadTooLarge { max_size: usize },

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Service temporarily unavailable: {0}")]
    Unavailable(#[from] DispatchError),
}

impl WebhookHandlerError {
    /// Whether the gateway should redeliver later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self {
            Self::InsecureTransport | Self::InvalidPayload { .. } => {
                (StatusCode::BAD_REQUEST, None)
            }
            Self::UnsupportedMediaType { .. } => (StatusCode::UNSUPPORTED_MEDIA_TYPE, None),
            Self::PayloadTooLarge { max_size } => {
                warn!(max_size = max_size, "Payload too large");
                (StatusCode::PAYLOAD_TOO_LARGE, None)
            }
            Self::Unavailable(e) => {
                let retry = match e {
                    DispatchError::QueueFull { .. } => QUEUE_FULL_RETRY_SECONDS,
                    DispatchError::Closed => UNAVAILABLE_RETRY_SECONDS,
                };
                (StatusCode::SERVICE_UNAVAILABLE, Some(retry))
            }
        };

        error_response(status, self.to_string(), retry_after)
    }
}

/// Operator endpoint errors
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Missing or invalid internal API key")]
    Unauthorized,

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Retry failed: {0}")]
    Retry(#[from] RetryError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string(), None),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string(), None),
            Self::BadRequest { .. } => (StatusCode::BAD_REQUEST, self.to_string(), None),
            Self::Retry(e) => match e {
                RetryError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string(), None),
                RetryError::NotRetryable { .. } | RetryError::RetryLimitExceeded { .. } => {
                    (StatusCode::CONFLICT, self.to_string(), None)
                }
                RetryError::InvalidPayload { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, self.to_string(), None)
                }
                RetryError::Store(store) => store_failure(store),
            },
            Self::Store(store) => store_failure(store),
        };

        error_response(status, message, retry_after)
    }
}

fn store_failure(e: &StoreError) -> (StatusCode, String, Option<u64>) {
    // Log detailed error server-side but return generic message to client
    error!(error = %e, "Admin request failed on storage");
    if e.is_transient() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Storage temporarily unavailable. Please try again later.".to_string(),
            Some(UNAVAILABLE_RETRY_SECONDS),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error occurred.".to_string(),
            None,
        )
    }
}

fn error_response(status: StatusCode, message: String, retry_after: Option<u64>) -> Response {
    let body = serde_json::json!({
        "error": message,
        "status": status.as_u16(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    let mut response = (status, Json(body)).into_response();

    if let Some(retry_seconds) = retry_after {
        if let Ok(header_value) = retry_seconds.to_string().parse() {
            response.headers_mut().insert("Retry-After", header_value);
        }
    }

    response
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Invalid security configuration: {0}")]
    Security(#[from] payhook_core::ConfigError),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
