//! Tests for core domain types.

use super::*;

#[test]
fn test_event_id_round_trips_through_string() {
    let id = EventId::new();
    let parsed: EventId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn test_event_id_rejects_garbage() {
    let result = "not-a-ulid".parse::<EventId>();
    assert!(matches!(result, Err(ParseError::InvalidFormat { .. })));
}

#[test]
fn test_business_key_requires_both_parts() {
    assert!(matches!(
        BusinessKey::new("", "DONE"),
        Err(ValidationError::Required { ref field }) if field == "transaction_id"
    ));
    assert!(matches!(
        BusinessKey::new("txn-1", "  "),
        Err(ValidationError::Required { ref field }) if field == "status"
    ));
}

#[test]
fn test_business_key_distinguishes_status() {
    let paid = BusinessKey::new("txn-1", "paid").unwrap();
    let cancelled = BusinessKey::new("txn-1", "cancelled").unwrap();
    assert_ne!(paid, cancelled);
    assert_eq!(paid.to_string(), "txn-1:paid");
}

#[test]
fn test_timestamp_parses_offset_rfc3339() {
    let ts = Timestamp::from_rfc3339("2024-02-13T12:18:14+09:00").unwrap();
    assert_eq!(ts.to_rfc3339(), "2024-02-13T03:18:14+00:00");
}

#[test]
fn test_timestamp_abs_diff_is_symmetric() {
    let a = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
    let b = a.add_seconds(90);
    assert_eq!(a.abs_diff_millis(b), 90_000);
    assert_eq!(b.abs_diff_millis(a), 90_000);
}

#[test]
fn test_timestamp_arithmetic_saturates_instead_of_dropping_the_offset() {
    let start = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();

    let far = start.add_seconds(u64::MAX);
    assert!(far > start);
    assert_eq!(far, start.add_duration(Duration::MAX));

    let early = start.subtract_duration(Duration::MAX);
    assert!(early < start);
}

#[test]
fn test_manual_clock_shared_between_clones() {
    let start = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
    let clock = ManualClock::new(start);
    let handle = clock.clone();

    handle.advance(Duration::from_secs(30));

    assert_eq!(clock.now(), start.add_seconds(30));
}

#[test]
fn test_error_category_follows_transience() {
    let transient = PayhookError::Store(StoreError::Unavailable {
        message: "db down".to_string(),
    });
    assert!(transient.is_transient());
    assert_eq!(transient.error_category(), ErrorCategory::Transient);

    let permanent = PayhookError::Validation(ValidationError::Required {
        field: "status".to_string(),
    });
    assert!(!permanent.is_transient());
    assert_eq!(permanent.error_category(), ErrorCategory::Permanent);
}
