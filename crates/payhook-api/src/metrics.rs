//! Prometheus metrics for the webhook service.
//!
//! Every [`ServiceMetrics`] owns its own [`Registry`], so several instances
//! (one per test router, for example) never collide on registration.

use payhook_core::{IdempotentOutcome, PipelineObserver, PipelineOutcome};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Service metrics for observability
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,

    // Intake
    pub deliveries_received_total: IntCounter,
    pub dispatch_rejections_total: IntCounter,
    pub dispatch_queue_depth: IntGauge,

    // Pipeline
    pub pipeline_decisions_total: IntCounterVec,
    pub pipeline_duration_seconds: Histogram,

    // Processing
    pub mutations_total: IntCounterVec,
    pub duplicates_total: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let deliveries_received_total = IntCounter::new(
            "payhook_deliveries_received_total",
            "Webhook deliveries received at the HTTP boundary",
        )?;
        let dispatch_rejections_total = IntCounter::new(
            "payhook_dispatch_rejections_total",
            "Deliveries refused because the dispatch queue was saturated or closed",
        )?;
        let dispatch_queue_depth = IntGauge::new(
            "payhook_dispatch_queue_depth",
            "Deliveries waiting for a pipeline worker",
        )?;
        let pipeline_decisions_total = IntCounterVec::new(
            Opts::new(
                "payhook_pipeline_decisions_total",
                "Terminal pipeline outcomes by label",
            ),
            &["outcome"],
        )?;
        let pipeline_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "payhook_pipeline_duration_seconds",
                "Time from dequeue to terminal outcome",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        let mutations_total = IntCounterVec::new(
            Opts::new(
                "payhook_mutations_total",
                "Downstream payment-state mutations by result",
            ),
            &["result"],
        )?;
        let duplicates_total = IntCounter::new(
            "payhook_duplicates_total",
            "Accepted deliveries skipped as already processed or in flight",
        )?;

        registry.register(Box::new(deliveries_received_total.clone()))?;
        registry.register(Box::new(dispatch_rejections_total.clone()))?;
        registry.register(Box::new(dispatch_queue_depth.clone()))?;
        registry.register(Box::new(pipeline_decisions_total.clone()))?;
        registry.register(Box::new(pipeline_duration_seconds.clone()))?;
        registry.register(Box::new(mutations_total.clone()))?;
        registry.register(Box::new(duplicates_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            deliveries_received_total,
            dispatch_rejections_total,
            dispatch_queue_depth,
            pipeline_decisions_total,
            pipeline_duration_seconds,
            mutations_total,
            duplicates_total,
        }))
    }

    /// Render every metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

impl PipelineObserver for ServiceMetrics {
    fn on_outcome(&self, outcome: &PipelineOutcome, elapsed: Duration) {
        self.pipeline_decisions_total
            .with_label_values(&[outcome.label()])
            .inc();
        self.pipeline_duration_seconds
            .observe(elapsed.as_secs_f64());

        if let PipelineOutcome::Accepted { processing, .. } = outcome {
            match processing {
                IdempotentOutcome::Applied { .. } => {
                    self.mutations_total.with_label_values(&["applied"]).inc()
                }
                IdempotentOutcome::Failed { .. } => {
                    self.mutations_total.with_label_values(&["failed"]).inc()
                }
                IdempotentOutcome::Duplicate { .. } => self.duplicates_total.inc(),
            }
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
