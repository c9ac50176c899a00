//! # Recording Payment Mutator
//!
//! A [`PaymentStatusMutator`] that records every invocation instead of
//! touching a payment ledger. Failures and latency can be scripted so the
//! idempotency and retry paths can be driven deterministically.

use crate::store::{MutationError, PaymentStatusMutator};
use crate::BusinessKey;
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::info;

/// One recorded call to [`PaymentStatusMutator::apply_payment_status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    pub business_key: BusinessKey,
    pub status: String,
    pub amount: i64,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct MutatorState {
    calls: Vec<AppliedMutation>,
    scripted_failures: VecDeque<MutationError>,
}

/// Mutator that logs and records each requested payment-state change
///
/// Cloning shares the recorded calls.
#[derive(Debug, Clone, Default)]
pub struct RecordingPaymentMutator {
    state: Arc<Mutex<MutatorState>>,
    latency: Option<Duration>,
}

impl RecordingPaymentMutator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it completes
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next call fail with `error`; queued failures are used in order
    pub fn fail_next(&self, error: MutationError) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.scripted_failures.push_back(error);
    }

    /// Every invocation so far, successful or not
    pub fn calls(&self) -> Vec<AppliedMutation> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .calls
            .clone()
    }

    /// Number of invocations so far
    pub fn call_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .calls
            .len()
    }

    /// Invocations that completed successfully
    pub fn applied(&self) -> Vec<AppliedMutation> {
        self.calls().into_iter().filter(|c| c.succeeded).collect()
    }
}

#[async_trait]
impl PaymentStatusMutator for RecordingPaymentMutator {
    async fn apply_payment_status(
        &self,
        business_key: &BusinessKey,
        status: &str,
        amount: i64,
    ) -> Result<(), MutationError> {
        let scripted = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let scripted = state.scripted_failures.pop_front();
            state.calls.push(AppliedMutation {
                business_key: business_key.clone(),
                status: status.to_string(),
                amount,
                succeeded: scripted.is_none(),
            });
            scripted
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = scripted {
            return Err(error);
        }

        info!(
            business_key = %business_key,
            status = status,
            amount = amount,
            "Payment status applied"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "recording_mutator_tests.rs"]
mod tests;
