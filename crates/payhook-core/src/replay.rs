//! # Replay Detection
//!
//! Flags byte-identical resends of an already-accepted delivery within a
//! lookback window. This is distinct from idempotent processing: a replay is
//! a security anomaly and is rejected, while a gateway retry with a changed
//! envelope for the same business event is accepted as a duplicate by the
//! idempotency gate.

use crate::store::{StoreError, WebhookEventStore};
use crate::{BusinessKey, Clock};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default lookback window
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Hex SHA-256 of the payload's canonical JSON form
///
/// Object keys are sorted at every level, so two payloads that differ only
/// in key order hash the same.
pub fn payload_hash(payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Looks up prior accepted deliveries with the same content
#[derive(Clone)]
pub struct ReplayGuard {
    store: Arc<dyn WebhookEventStore>,
    clock: Arc<dyn Clock>,
}

impl ReplayGuard {
    pub fn new(store: Arc<dyn WebhookEventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// True when an accepted delivery with this hash and key was received
    /// within `lookback`
    ///
    /// # Errors
    ///
    /// Propagates store failures; the caller decides how to fail closed.
    #[instrument(skip(self, business_key), fields(business_key = %business_key))]
    pub async fn is_replay(
        &self,
        business_key: &BusinessKey,
        payload_hash: &str,
        lookback: Duration,
    ) -> Result<bool, StoreError> {
        let since = self.clock.now().subtract_duration(lookback);
        let prior = self
            .store
            .find_by_hash(payload_hash, business_key, since)
            .await?;

        if let Some(original) = &prior {
            debug!(original_event_id = %original.id, "Prior delivery with identical payload");
        }

        Ok(prior.is_some())
    }
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
