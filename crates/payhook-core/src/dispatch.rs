//! # Dispatch
//!
//! Decouples webhook acknowledgement from processing. The transport layer
//! submits each delivery to a bounded queue and returns immediately; a fixed
//! pool of workers drains the queue through the [`WebhookPipeline`].
//!
//! A saturated queue refuses new work with [`DispatchError::QueueFull`]
//! instead of dropping it, so the caller can answer with a retryable status.

use crate::event::InboundWebhook;
use crate::pipeline::{PipelineOutcome, WebhookPipeline};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receives every terminal pipeline outcome produced by a worker
pub trait PipelineObserver: Send + Sync {
    fn on_outcome(&self, outcome: &PipelineOutcome, elapsed: Duration);
}

/// Queue and worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Deliveries that may wait for a worker
    pub queue_capacity: usize,
    /// Concurrent pipeline executions
    pub workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
        }
    }
}

/// Bounded work queue in front of the pipeline
pub struct WebhookDispatcher {
    sender: RwLock<Option<mpsc::Sender<InboundWebhook>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    accepting: AtomicBool,
    capacity: usize,
}

impl WebhookDispatcher {
    /// Start the worker pool
    ///
    /// Must be called from within a Tokio runtime. Zero capacity or zero
    /// workers are raised to one.
    pub fn start(
        pipeline: Arc<WebhookPipeline>,
        config: DispatcherConfig,
        observer: Option<Arc<dyn PipelineObserver>>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let worker_count = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    receiver.clone(),
                    pipeline.clone(),
                    observer.clone(),
                ))
            })
            .collect();

        info!(
            queue_capacity = capacity,
            workers = worker_count,
            "Webhook dispatcher started"
        );

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            accepting: AtomicBool::new(true),
            capacity,
        }
    }

    /// Queue a delivery for processing
    ///
    /// # Errors
    ///
    /// - [`DispatchError::QueueFull`] when every queue slot is taken
    /// - [`DispatchError::Closed`] after [`Self::shutdown`]
    pub fn submit(&self, inbound: InboundWebhook) -> Result<(), DispatchError> {
        let guard = self
            .sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = guard.as_ref().ok_or(DispatchError::Closed)?;

        match sender.try_send(inbound) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                warn!(
                    event_id = %rejected.id,
                    capacity = self.capacity,
                    "Dispatch queue full; refusing delivery"
                );
                Err(DispatchError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Deliveries waiting for a worker
    pub fn queued(&self) -> usize {
        let guard = self
            .sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .map_or(0, |sender| sender.max_capacity() - sender.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop intake, let the workers drain the queue, and wait for them
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let sender = self
            .sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatch worker terminated abnormally");
            }
        }

        info!("Webhook dispatcher stopped");
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<InboundWebhook>>>,
    pipeline: Arc<WebhookPipeline>,
    observer: Option<Arc<dyn PipelineObserver>>,
) {
    debug!(worker = worker, "Dispatch worker started");

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(inbound) = next else {
            break;
        };

        let started = Instant::now();
        let outcome = pipeline.process(inbound).await;
        if let Some(observer) = &observer {
            observer.on_outcome(&outcome, started.elapsed());
        }
    }

    debug!(worker = worker, "Dispatch worker stopped");
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("capacity", &self.capacity)
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

/// Errors returned when queuing a delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Dispatch queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Dispatcher is shut down")]
    Closed,
}

impl DispatchError {
    /// Check if the submission may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
