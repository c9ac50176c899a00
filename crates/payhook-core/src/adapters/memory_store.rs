//! # In-Memory Stores
//!
//! Thread-safe in-memory implementations of [`WebhookEventStore`] and
//! [`SecurityEventStore`].
//!
//! Claims and processed markers live under the same `RwLock` as the event
//! records, so `try_claim` and `mark_processed` are atomic with respect to
//! each other. Lock poisoning is reported as [`StoreError::Unavailable`].

use crate::event::WebhookEvent;
use crate::security_events::{SecurityEvent, ValidationDecision};
use crate::store::{
    ClaimOutcome, SecurityEventFilter, SecurityEventStore, SecurityEventSummary, StoreError,
    WebhookEventFilter, WebhookEventStore, WebhookEventUpdate,
};
use crate::{BusinessKey, EventId, Timestamp};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};

fn poisoned(store: &str) -> StoreError {
    StoreError::Unavailable {
        message: format!("{} lock poisoned", store),
    }
}

fn offline(store: &str) -> StoreError {
    StoreError::Unavailable {
        message: format!("{} is offline", store),
    }
}

// ============================================================================
// Webhook events
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Claim {
    holder: EventId,
    expires_at: Timestamp,
}

#[derive(Debug, Default)]
struct WebhookEventState {
    events: HashMap<EventId, WebhookEvent>,
    processed: HashMap<BusinessKey, EventId>,
    claims: HashMap<BusinessKey, Claim>,
}

/// In-memory webhook event store
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWebhookEventStore {
    state: Arc<RwLock<WebhookEventState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryWebhookEventStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until reset
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, WebhookEventState>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline("webhook event store"));
        }
        self.state.read().map_err(|_| poisoned("webhook event store"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, WebhookEventState>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline("webhook event store"));
        }
        self.state.write().map_err(|_| poisoned("webhook event store"))
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryWebhookEventStore {
    async fn insert(&self, event: WebhookEvent) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.events.contains_key(&event.id) {
            return Err(StoreError::Duplicate {
                id: event.id.to_string(),
            });
        }
        state.events.insert(event.id, event);
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<WebhookEvent>, StoreError> {
        Ok(self.read()?.events.get(&id).cloned())
    }

    async fn find_by_hash(
        &self,
        payload_hash: &str,
        business_key: &BusinessKey,
        since: Timestamp,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        let state = self.read()?;
        Ok(state
            .events
            .values()
            .filter(|e| {
                e.validation.valid
                    && e.payload_hash == payload_hash
                    && e.business_key.as_ref() == Some(business_key)
                    && e.received_at >= since
            })
            .max_by_key(|e| (e.received_at, e.id))
            .cloned())
    }

    async fn find_processed(&self, business_key: &BusinessKey) -> Result<bool, StoreError> {
        Ok(self.read()?.processed.contains_key(business_key))
    }

    async fn try_claim(
        &self,
        business_key: &BusinessKey,
        event_id: EventId,
        lease: Duration,
        now: Timestamp,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.write()?;

        if state.processed.contains_key(business_key) {
            return Ok(ClaimOutcome::AlreadyProcessed);
        }

        if let Some(claim) = state.claims.get(business_key) {
            if claim.holder != event_id && claim.expires_at > now {
                return Ok(ClaimOutcome::InFlight {
                    holder: claim.holder,
                });
            }
        }

        state.claims.insert(
            business_key.clone(),
            Claim {
                holder: event_id,
                expires_at: now.add_duration(lease),
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn release_claim(
        &self,
        business_key: &BusinessKey,
        event_id: EventId,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state
            .claims
            .get(business_key)
            .is_some_and(|c| c.holder == event_id)
        {
            state.claims.remove(business_key);
        }
        Ok(())
    }

    async fn mark_processed(
        &self,
        business_key: &BusinessKey,
        event_id: EventId,
        duration_ms: u64,
        processed_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut state = self.write()?;

        if state.processed.contains_key(business_key) {
            return Ok(false);
        }

        state.processed.insert(business_key.clone(), event_id);
        state.claims.remove(business_key);

        if let Some(event) = state.events.get_mut(&event_id) {
            event.processed = true;
            event.processed_at = Some(processed_at);
            event.processing_duration_ms = Some(duration_ms);
            event.error_message = None;
        }

        Ok(true)
    }

    async fn update(&self, id: EventId, update: WebhookEventUpdate) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let event = state
            .events
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        update.apply_to(event);
        Ok(())
    }

    async fn list(&self, filter: &WebhookEventFilter) -> Result<Vec<WebhookEvent>, StoreError> {
        let state = self.read()?;
        let mut events: Vec<WebhookEvent> = state
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        events.sort_by(|a, b| (b.received_at, b.id).cmp(&(a.received_at, a.id)));
        events.truncate(filter.effective_limit());
        Ok(events)
    }
}

// ============================================================================
// Security events
// ============================================================================

/// In-memory append-only security event store
#[derive(Debug, Clone, Default)]
pub struct InMemorySecurityEventStore {
    events: Arc<RwLock<Vec<SecurityEvent>>>,
    decisions: Arc<RwLock<Vec<ValidationDecision>>>,
    offline: Arc<AtomicBool>,
}

impl InMemorySecurityEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until reset
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Copy of every stored event in append order
    pub fn snapshot(&self) -> Vec<SecurityEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// Copy of every recorded validation decision in append order
    pub fn decisions(&self) -> Vec<ValidationDecision> {
        self.decisions.read().map(|d| d.clone()).unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline("security event store"));
        }
        Ok(())
    }
}

#[async_trait]
impl SecurityEventStore for InMemorySecurityEventStore {
    async fn append(&self, event: SecurityEvent) -> Result<(), StoreError> {
        self.check_online()?;
        self.events
            .write()
            .map_err(|_| poisoned("security event store"))?
            .push(event);
        Ok(())
    }

    async fn append_decision(&self, decision: ValidationDecision) -> Result<(), StoreError> {
        self.check_online()?;
        self.decisions
            .write()
            .map_err(|_| poisoned("security event store"))?
            .push(decision);
        Ok(())
    }

    async fn list(&self, filter: &SecurityEventFilter) -> Result<Vec<SecurityEvent>, StoreError> {
        self.check_online()?;
        let events = self
            .events
            .read()
            .map_err(|_| poisoned("security event store"))?;

        Ok(events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(filter.effective_limit())
            .cloned()
            .collect())
    }

    async fn summary(&self, since: Timestamp) -> Result<SecurityEventSummary, StoreError> {
        self.check_online()?;
        let events = self
            .events
            .read()
            .map_err(|_| poisoned("security event store"))?;
        Ok(SecurityEventSummary::from_events(since, events.iter()))
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
