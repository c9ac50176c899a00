//! Operator endpoints for inspecting and retrying stored deliveries.
//!
//! Every route here sits behind [`require_internal_api_key`]. The surface is
//! read-only apart from retry, which re-enters processing through the
//! [`RetryCoordinator`](payhook_core::RetryCoordinator).

use crate::errors::AdminError;
use crate::responses::{
    EventDetailResponse, EventListParams, EventListResponse, EventSummary, RetryResponse,
    SecurityEventListParams, SecurityEventListResponse, SummaryParams,
};
use crate::AppState;
use axum::{
    extract::{Path, Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use payhook_core::signature::constant_time_eq;
use payhook_core::{
    EventId, SecurityEventFilter, SecurityEventSummary, SecurityEventType, Severity,
    WebhookEventFilter, WebhookEventStatusFilter,
};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Header carrying the operator API key
pub const API_KEY_HEADER: &str = "x-internal-api-key";

/// Header naming the operator for audit
pub const REQUESTED_BY_HEADER: &str = "x-requested-by";

/// Longest security summary window
const MAX_SUMMARY_HOURS: u64 = 24 * 30;

/// Reject requests without the configured internal API key
///
/// When no key is configured every request is refused.
pub async fn require_internal_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin.api_key() else {
        warn!("Admin request refused: no internal API key configured");
        return AdminError::Unauthorized.into_response();
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        warn!(path = %request.uri().path(), "Admin request with missing or invalid API key");
        return AdminError::Unauthorized.into_response();
    }

    next.run(request).await
}

/// List stored deliveries, newest first
#[instrument(skip(state))]
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventListParams>,
) -> Result<Json<EventListResponse>, AdminError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<WebhookEventStatusFilter>)
        .transpose()
        .map_err(|e| AdminError::BadRequest {
            message: e.to_string(),
        })?;

    let filter = WebhookEventFilter {
        status,
        limit: params.limit.unwrap_or(WebhookEventFilter::default().limit),
        ..Default::default()
    };

    let events: Vec<EventSummary> = state
        .webhook_store
        .list(&filter)
        .await?
        .iter()
        .map(EventSummary::from)
        .collect();

    Ok(Json(EventListResponse {
        count: events.len(),
        events,
    }))
}

/// Full stored delivery, payload included
#[instrument(skip(state))]
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<EventDetailResponse>, AdminError> {
    let event_id = parse_event_id(&event_id)?;

    let event = state
        .webhook_store
        .get(event_id)
        .await?
        .ok_or_else(|| AdminError::NotFound {
            resource: format!("Webhook event {}", event_id),
        })?;

    Ok(Json(EventDetailResponse { event }))
}

/// Resubmit a stored delivery to processing
#[instrument(skip(state, headers))]
pub async fn retry_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RetryResponse>, AdminError> {
    let event_id = parse_event_id(&event_id)?;
    let requested_by = headers
        .get(REQUESTED_BY_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or("operator")
        .to_string();

    info!(event_id = %event_id, requested_by = %requested_by, "Operator retry requested");
    let result = state.retry.retry(event_id, &requested_by).await?;

    Ok(Json(RetryResponse {
        requested_by,
        result,
    }))
}

/// List recorded security events, newest first
#[instrument(skip(state))]
pub async fn list_security_events(
    State(state): State<AppState>,
    Query(params): Query<SecurityEventListParams>,
) -> Result<Json<SecurityEventListResponse>, AdminError> {
    let bad_request = |e: payhook_core::ParseError| AdminError::BadRequest {
        message: e.to_string(),
    };

    let filter = SecurityEventFilter {
        event_type: params
            .event_type
            .as_deref()
            .map(str::parse::<SecurityEventType>)
            .transpose()
            .map_err(bad_request)?,
        severity: params
            .severity
            .as_deref()
            .map(str::parse::<Severity>)
            .transpose()
            .map_err(bad_request)?,
        since: None,
        limit: params.limit.unwrap_or(SecurityEventFilter::default().limit),
    };

    let events = state.security_store.list(&filter).await?;

    Ok(Json(SecurityEventListResponse {
        count: events.len(),
        events,
    }))
}

/// Counts of security events by type and severity over the last `hours`
#[instrument(skip(state))]
pub async fn security_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<SecurityEventSummary>, AdminError> {
    let hours = params.hours.unwrap_or(24);
    if hours == 0 || hours > MAX_SUMMARY_HOURS {
        return Err(AdminError::BadRequest {
            message: format!("hours must be between 1 and {}", MAX_SUMMARY_HOURS),
        });
    }

    let since = state
        .clock
        .now()
        .subtract_duration(Duration::from_secs(hours * 60 * 60));
    let summary = state.security_store.summary(since).await?;

    Ok(Json(summary))
}

fn parse_event_id(raw: &str) -> Result<EventId, AdminError> {
    raw.parse::<EventId>().map_err(|e| AdminError::BadRequest {
        message: e.to_string(),
    })
}

#[cfg(test)]
#[path = "admin_tests.rs"]
mod tests;
