use super::*;

#[tokio::test]
async fn test_records_successful_calls() {
    let mutator = RecordingPaymentMutator::new();
    let key = BusinessKey::new("txn-1", "DONE").unwrap();

    mutator.apply_payment_status(&key, "DONE", 1500).await.unwrap();

    assert_eq!(
        mutator.calls(),
        vec![AppliedMutation {
            business_key: key,
            status: "DONE".to_string(),
            amount: 1500,
            succeeded: true,
        }]
    );
}

#[tokio::test]
async fn test_scripted_failure_used_once() {
    let mutator = RecordingPaymentMutator::new();
    let key = BusinessKey::new("txn-1", "DONE").unwrap();
    mutator.fail_next(MutationError::Unavailable {
        message: "ledger down".to_string(),
    });

    let first = mutator.apply_payment_status(&key, "DONE", 1500).await;
    let second = mutator.apply_payment_status(&key, "DONE", 1500).await;

    assert!(matches!(first, Err(MutationError::Unavailable { .. })));
    assert!(second.is_ok());
    assert_eq!(mutator.call_count(), 2);
    assert_eq!(mutator.applied().len(), 1);
}

#[tokio::test]
async fn test_clones_share_recorded_calls() {
    let mutator = RecordingPaymentMutator::new();
    let handle = mutator.clone();
    let key = BusinessKey::new("txn-1", "DONE").unwrap();

    mutator.apply_payment_status(&key, "DONE", 1).await.unwrap();

    assert_eq!(handle.call_count(), 1);
}
