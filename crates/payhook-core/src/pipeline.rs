//! # Webhook Pipeline
//!
//! Runs every inbound delivery through a fixed sequence of gates and, when
//! all pass, hands the payment event to the [`IdempotencyGate`].
//!
//! ## Gate order
//!
//! ```text
//! Received → IpChecked → RateChecked → SignatureChecked
//!          → TimestampChecked → ReplayChecked → Accepted
//! ```
//!
//! The first failing gate decides the terminal rejection and its security
//! event; later gates never run. A blocked source therefore never consumes a
//! rate-limit slot and never learns whether its signature would have passed.
//! Every gate runs under a bounded timeout and a timeout is a rejection.
//!
//! Validation outcomes never surface as errors. The delivery record is
//! persisted and the security events recorded whatever the outcome; storage
//! failures on that path are raised through the alert notifier.

use crate::config::{ConfigError, WebhookSecurityConfig};
use crate::event::{InboundWebhook, PaymentWebhookPayload, WebhookEvent, WebhookEventValidation};
use crate::freshness::TimestampGuard;
use crate::idempotency::{IdempotencyGate, IdempotentOutcome};
use crate::ip_allowlist::IpAllowlist;
use crate::rate_limit::{FixedWindowRateLimiter, RateLimiter};
use crate::replay::{payload_hash, ReplayGuard};
use crate::security_events::{
    AlertNotifier, SecurityEvent, SecurityEventRecorder, SecurityEventType, Severity,
    ValidationDecision,
};
use crate::signature::SignatureVerifier;
use crate::store::{PaymentStatusMutator, SecurityEventStore, WebhookEventStore};
use crate::{BusinessKey, Clock, EventId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};

// ============================================================================
// State machine
// ============================================================================

/// Last gate a delivery passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    IpChecked,
    RateChecked,
    SignatureChecked,
    TimestampChecked,
    ReplayChecked,
    Accepted,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::IpChecked => "ip_checked",
            Self::RateChecked => "rate_checked",
            Self::SignatureChecked => "signature_checked",
            Self::TimestampChecked => "timestamp_checked",
            Self::ReplayChecked => "replay_checked",
            Self::Accepted => "accepted",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a delivery was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    IpBlocked,
    RateLimited { retry_after_secs: u64 },
    InvalidSignature,
    /// Signed correctly but not a usable payment payload
    MalformedPayload { message: String },
    TimestampExpired,
    ReplayDetected,
    /// A gate did not answer within its time budget
    GateTimeout { stage: PipelineStage },
    /// A gate's backing store failed
    GateUnavailable { stage: PipelineStage, message: String },
}

impl RejectionReason {
    /// Short stable label for metrics and filtering
    pub fn label(&self) -> &'static str {
        match self {
            Self::IpBlocked => "ip_blocked",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidSignature => "invalid_signature",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::TimestampExpired => "timestamp_expired",
            Self::ReplayDetected => "replay_detected",
            Self::GateTimeout { .. } => "gate_timeout",
            Self::GateUnavailable { .. } => "gate_unavailable",
        }
    }

    /// Security event type and severity recorded for this rejection
    pub fn security_classification(&self) -> (SecurityEventType, Severity) {
        let event_type = match self {
            Self::IpBlocked => SecurityEventType::IpBlocked,
            Self::RateLimited { .. } => SecurityEventType::RateLimitExceeded,
            Self::InvalidSignature => SecurityEventType::InvalidSignature,
            Self::TimestampExpired => SecurityEventType::TimestampExpired,
            Self::ReplayDetected => SecurityEventType::ReplayDetected,
            Self::MalformedPayload { .. } => {
                return (SecurityEventType::Anomalous, Severity::Medium)
            }
            Self::GateTimeout { .. } | Self::GateUnavailable { .. } => {
                return (SecurityEventType::Anomalous, Severity::High)
            }
        };
        (event_type, event_type.default_severity())
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IpBlocked => write!(f, "Source address not allowed"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limit exceeded; retry after {}s", retry_after_secs)
            }
            Self::InvalidSignature => write!(f, "Invalid or missing signature"),
            Self::MalformedPayload { message } => write!(f, "Malformed payload: {}", message),
            Self::TimestampExpired => write!(f, "Timestamp missing or outside tolerance"),
            Self::ReplayDetected => write!(f, "Replay of a previously accepted delivery"),
            Self::GateTimeout { stage } => write!(f, "Timed out before reaching {}", stage),
            Self::GateUnavailable { stage, message } => {
                write!(f, "Check for {} unavailable: {}", stage, message)
            }
        }
    }
}

/// Result of the validation gauntlet for one delivery
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// Last stage passed
    pub stage: PipelineStage,
    pub rejection: Option<RejectionReason>,
    /// Present once the payload has been parsed
    pub payload: Option<PaymentWebhookPayload>,
    pub business_key: Option<BusinessKey>,
    pub payload_hash: String,
    /// In the order they were raised
    pub security_events: Vec<SecurityEvent>,
}

impl ValidationOutcome {
    fn new(payload_hash: String) -> Self {
        Self {
            stage: PipelineStage::Received,
            rejection: None,
            payload: None,
            business_key: None,
            payload_hash,
            security_events: Vec::new(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.stage == PipelineStage::Accepted && self.rejection.is_none()
    }

    /// Validation record stored on the delivery
    pub fn to_record(&self) -> WebhookEventValidation {
        WebhookEventValidation {
            valid: self.is_accepted(),
            failure_reason: self.rejection.as_ref().map(ToString::to_string),
            security_events: self.security_events.clone(),
        }
    }
}

/// Terminal result of processing one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Rejected {
        event_id: EventId,
        reason: RejectionReason,
    },
    Accepted {
        event_id: EventId,
        processing: IdempotentOutcome,
    },
}

impl PipelineOutcome {
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Rejected { event_id, .. } | Self::Accepted { event_id, .. } => *event_id,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Label for metrics: the rejection label, or the processing result
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected { reason, .. } => reason.label(),
            Self::Accepted { processing, .. } => match processing {
                IdempotentOutcome::Applied { .. } => "applied",
                IdempotentOutcome::Duplicate { .. } => "duplicate",
                IdempotentOutcome::Failed { .. } => "processing_failed",
            },
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Collaborators the pipeline is wired to
#[derive(Clone)]
pub struct PipelineDependencies {
    pub webhook_store: Arc<dyn WebhookEventStore>,
    pub security_store: Arc<dyn SecurityEventStore>,
    pub mutator: Arc<dyn PaymentStatusMutator>,
    pub clock: Arc<dyn Clock>,
    pub alerts: Arc<dyn AlertNotifier>,
    /// Defaults to an in-process fixed-window limiter built from the config
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
}

/// Ordered validation gauntlet in front of idempotent processing
pub struct WebhookPipeline {
    config: WebhookSecurityConfig,
    allowlist: IpAllowlist,
    rate_limiter: Arc<dyn RateLimiter>,
    verifier: SignatureVerifier,
    freshness: TimestampGuard,
    replay: ReplayGuard,
    recorder: SecurityEventRecorder,
    gate: IdempotencyGate,
    webhook_store: Arc<dyn WebhookEventStore>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertNotifier>,
}

impl WebhookPipeline {
    /// Build the pipeline from configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(
        config: WebhookSecurityConfig,
        deps: PipelineDependencies,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let allowlist = IpAllowlist::from_config(&config)?;
        let rate_limiter = deps.rate_limiter.unwrap_or_else(|| {
            Arc::new(FixedWindowRateLimiter::new(
                config.rate_limit_max_requests,
                config.rate_limit_window(),
                deps.clock.clone(),
            ))
        });

        if config.shared_secret.as_ref().map_or(true, |s| s.is_empty()) {
            warn!("No webhook shared secret configured; every delivery will fail signature verification");
        }

        let gate = IdempotencyGate::new(
            deps.webhook_store.clone(),
            deps.mutator,
            deps.clock.clone(),
            deps.alerts.clone(),
            config.claim_lease(),
            config.downstream_timeout(),
        );

        Ok(Self {
            allowlist,
            rate_limiter,
            verifier: SignatureVerifier::new(config.shared_secret.clone()),
            freshness: TimestampGuard::new(deps.clock.clone()),
            replay: ReplayGuard::new(deps.webhook_store.clone(), deps.clock.clone()),
            recorder: SecurityEventRecorder::new(deps.security_store, deps.alerts.clone()),
            gate,
            webhook_store: deps.webhook_store,
            clock: deps.clock,
            alerts: deps.alerts,
            config,
        })
    }

    pub fn config(&self) -> &WebhookSecurityConfig {
        &self.config
    }

    pub fn gate(&self) -> &IdempotencyGate {
        &self.gate
    }

    pub fn recorder(&self) -> &SecurityEventRecorder {
        &self.recorder
    }

    pub fn webhook_store(&self) -> Arc<dyn WebhookEventStore> {
        self.webhook_store.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Validate, persist, record, and on acceptance process one delivery
    #[instrument(skip(self, inbound), fields(event_id = %inbound.id, source_ip = %inbound.source_ip))]
    pub async fn process(&self, inbound: InboundWebhook) -> PipelineOutcome {
        let validation = self.validate(&inbound).await;

        let record = WebhookEvent::from_inbound(
            &inbound,
            validation.business_key.clone(),
            validation.payload_hash.clone(),
            validation.to_record(),
        );
        if let Err(e) = self.webhook_store.insert(record).await {
            self.alerts.notify(
                "webhook_event_store",
                &format!("Failed to persist webhook event {}: {}", inbound.id, e),
            );
        }

        self.recorder.record_all(&validation.security_events).await;
        self.recorder
            .record_decision(&ValidationDecision {
                webhook_event_id: inbound.id,
                accepted: validation.rejection.is_none(),
                stage: validation.stage.to_string(),
                reason: validation.rejection.as_ref().map(|r| r.label().to_string()),
                source_ip: inbound.source_ip.clone(),
                timestamp: self.clock.now(),
            })
            .await;

        match (validation.rejection, validation.payload) {
            (Some(reason), _) => {
                warn!(
                    event_id = %inbound.id,
                    stage = %validation.stage,
                    reason = reason.label(),
                    "Webhook rejected"
                );
                PipelineOutcome::Rejected {
                    event_id: inbound.id,
                    reason,
                }
            }
            (None, Some(payload)) => {
                info!(
                    event_id = %inbound.id,
                    transaction_id = %payload.transaction_id,
                    status = %payload.status,
                    "Webhook accepted"
                );
                let processing = self.gate.execute(inbound.id, &payload).await;
                PipelineOutcome::Accepted {
                    event_id: inbound.id,
                    processing,
                }
            }
            (None, None) => {
                // Accepted without a parsed payload cannot happen; treat as malformed.
                PipelineOutcome::Rejected {
                    event_id: inbound.id,
                    reason: RejectionReason::MalformedPayload {
                        message: "payload missing after validation".to_string(),
                    },
                }
            }
        }
    }

    /// Run the gates in order, stopping at the first failure
    pub async fn validate(&self, inbound: &InboundWebhook) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::new(payload_hash(&inbound.payload));
        let source_ip = inbound.source_ip.as_str();

        // Source address
        let allowed = match self
            .run_gate(PipelineStage::IpChecked, async {
                self.allowlist.is_allowed(source_ip)
            })
            .await
        {
            Ok(allowed) => allowed,
            Err(reason) => return self.reject(outcome, inbound, reason),
        };
        if !allowed {
            return self.reject(outcome, inbound, RejectionReason::IpBlocked);
        }
        outcome.stage = PipelineStage::IpChecked;

        // Rate
        let decision = match self
            .run_gate(PipelineStage::RateChecked, self.rate_limiter.allow(source_ip))
            .await
        {
            Ok(decision) => decision,
            Err(reason) => return self.reject(outcome, inbound, reason),
        };
        if !decision.allowed {
            let retry_after_secs = decision.retry_after(self.clock.now()).as_secs().max(1);
            return self.reject(
                outcome,
                inbound,
                RejectionReason::RateLimited { retry_after_secs },
            );
        }
        outcome.stage = PipelineStage::RateChecked;

        self.check_user_agent(&mut outcome, inbound);

        // Signature
        let signature_valid = match self
            .run_gate(PipelineStage::SignatureChecked, async {
                self.verifier.verify(&inbound.payload)
            })
            .await
        {
            Ok(valid) => valid,
            Err(reason) => return self.reject(outcome, inbound, reason),
        };
        if !signature_valid {
            return self.reject(outcome, inbound, RejectionReason::InvalidSignature);
        }
        outcome.stage = PipelineStage::SignatureChecked;

        let payload = match PaymentWebhookPayload::from_value(&inbound.payload) {
            Ok(payload) => payload,
            Err(e) => {
                return self.reject(
                    outcome,
                    inbound,
                    RejectionReason::MalformedPayload {
                        message: e.to_string(),
                    },
                )
            }
        };
        match payload.business_key() {
            Ok(key) => outcome.business_key = Some(key),
            Err(e) => {
                return self.reject(
                    outcome,
                    inbound,
                    RejectionReason::MalformedPayload {
                        message: e.to_string(),
                    },
                )
            }
        }

        // Freshness
        let tolerance = self.config.timestamp_tolerance();
        let fresh = match self
            .run_gate(PipelineStage::TimestampChecked, async {
                payload
                    .declared_timestamp()
                    .is_some_and(|declared| self.freshness.is_fresh(declared, tolerance))
            })
            .await
        {
            Ok(fresh) => fresh,
            Err(reason) => return self.reject(outcome, inbound, reason),
        };
        if !fresh {
            return self.reject(outcome, inbound, RejectionReason::TimestampExpired);
        }
        outcome.stage = PipelineStage::TimestampChecked;

        // Replay
        if self.config.enable_replay_protection {
            let key = outcome.business_key.clone();
            if let Some(key) = key {
                let lookup = self
                    .run_gate(
                        PipelineStage::ReplayChecked,
                        self.replay.is_replay(
                            &key,
                            &outcome.payload_hash,
                            self.config.replay_lookback(),
                        ),
                    )
                    .await;

                match lookup {
                    Ok(Ok(false)) => {}
                    Ok(Ok(true)) => {
                        return self.reject(outcome, inbound, RejectionReason::ReplayDetected)
                    }
                    Ok(Err(e)) => {
                        self.alerts.notify(
                            "webhook_event_store",
                            &format!("Replay lookup failed for {}: {}", inbound.id, e),
                        );
                        return self.reject(
                            outcome,
                            inbound,
                            RejectionReason::GateUnavailable {
                                stage: PipelineStage::ReplayChecked,
                                message: e.to_string(),
                            },
                        );
                    }
                    Err(reason) => return self.reject(outcome, inbound, reason),
                }
            }
        }
        outcome.stage = PipelineStage::ReplayChecked;

        outcome.payload = Some(payload);
        outcome.stage = PipelineStage::Accepted;
        outcome
    }

    async fn run_gate<T>(
        &self,
        stage: PipelineStage,
        check: impl Future<Output = T>,
    ) -> Result<T, RejectionReason> {
        tokio::time::timeout(self.config.gate_timeout(), check)
            .await
            .map_err(|_| RejectionReason::GateTimeout { stage })
    }

    fn check_user_agent(&self, outcome: &mut ValidationOutcome, inbound: &InboundWebhook) {
        let expected = match &self.config.expected_user_agent_prefix {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => return,
        };

        let matches = inbound
            .user_agent
            .as_deref()
            .is_some_and(|ua| ua.starts_with(expected.as_str()));
        if !matches {
            let event = self
                .security_event(inbound, SecurityEventType::Anomalous, Severity::Medium)
                .with_detail("cause", "unexpected user agent")
                .with_detail("expected_user_agent_prefix", expected.clone());
            outcome.security_events.push(event);
        }
    }

    fn reject(
        &self,
        mut outcome: ValidationOutcome,
        inbound: &InboundWebhook,
        reason: RejectionReason,
    ) -> ValidationOutcome {
        let (event_type, severity) = reason.security_classification();
        let mut event = self
            .security_event(inbound, event_type, severity)
            .with_detail("cause", reason.to_string())
            .with_detail("stage", outcome.stage.as_str());
        if let Some(key) = &outcome.business_key {
            event = event.with_detail("business_key", key.to_string());
        }

        outcome.security_events.push(event);
        outcome.rejection = Some(reason);
        outcome
    }

    fn security_event(
        &self,
        inbound: &InboundWebhook,
        event_type: SecurityEventType,
        severity: Severity,
    ) -> SecurityEvent {
        SecurityEvent::new(event_type, self.clock.now())
            .with_severity(severity)
            .with_webhook_event(inbound.id)
            .with_detail("source_ip", inbound.source_ip.clone())
            .with_detail(
                "user_agent",
                inbound.user_agent.clone().unwrap_or_else(|| "-".to_string()),
            )
    }
}

impl fmt::Debug for WebhookPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookPipeline")
            .field("config", &self.config)
            .field("allowlist", &self.allowlist)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
