//! # Infrastructure Adapters
//!
//! In-process implementations of the store and mutator interfaces, used by
//! the service binary's standalone mode and by tests.

pub mod memory_store;
pub mod recording_mutator;

pub use memory_store::{InMemorySecurityEventStore, InMemoryWebhookEventStore};
pub use recording_mutator::{AppliedMutation, RecordingPaymentMutator};
