//! Tests for [`ServiceMetrics`].

use super::*;
use payhook_core::{EventId, RejectionReason};

#[test]
fn test_instances_do_not_collide() {
    let first = ServiceMetrics::new();
    let second = ServiceMetrics::new();

    assert!(first.is_ok());
    assert!(second.is_ok());
}

#[test]
fn test_observer_counts_outcomes_by_label() {
    let metrics = ServiceMetrics::new().unwrap();
    let event_id = EventId::new();

    metrics.on_outcome(
        &PipelineOutcome::Accepted {
            event_id,
            processing: IdempotentOutcome::Applied { duration_ms: 4 },
        },
        Duration::from_millis(4),
    );
    metrics.on_outcome(
        &PipelineOutcome::Accepted {
            event_id,
            processing: IdempotentOutcome::Duplicate { in_flight: false },
        },
        Duration::from_millis(1),
    );
    metrics.on_outcome(
        &PipelineOutcome::Rejected {
            event_id,
            reason: RejectionReason::ReplayDetected,
        },
        Duration::from_millis(1),
    );

    assert_eq!(
        metrics
            .pipeline_decisions_total
            .with_label_values(&["applied"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .pipeline_decisions_total
            .with_label_values(&["replay_detected"])
            .get(),
        1
    );
    assert_eq!(metrics.mutations_total.with_label_values(&["applied"]).get(), 1);
    assert_eq!(metrics.duplicates_total.get(), 1);
    assert_eq!(metrics.pipeline_duration_seconds.get_sample_count(), 3);
}

#[test]
fn test_render_uses_text_format() {
    let metrics = ServiceMetrics::new().unwrap();
    metrics.deliveries_received_total.inc();

    let rendered = metrics.render().unwrap();

    assert!(rendered.contains("# TYPE payhook_deliveries_received_total counter"));
    assert!(rendered.contains("payhook_deliveries_received_total 1"));
}
