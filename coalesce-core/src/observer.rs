//! Passive lifecycle observers.
//!
//! Observers are injected at construction and receive every batch event in
//! order, keyed by loader name and batch sequence number. They cannot change
//! what the loader does. `on_event` may run while the loader's state lock is
//! held, so an observer must not call back into the loader.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// A lifecycle notification from a loader
pub enum BatchEvent<'a, Q> {
    /// A fresh, empty batch was installed
    Created,
    /// A query joined the pending batch (or matched a query already in it)
    Enqueued {
        query: &'a Q,
        duplicate: bool,
        pending: &'a [Q],
        delay: Duration,
    },
    /// The batch function was invoked with these queries
    FetchStarted { queries: &'a [Q] },
    /// The batch function returned data
    DataReceived { elapsed: Duration },
    /// The batch function failed; every waiter of the batch is rejected
    Failed {
        error: &'a (dyn fmt::Display + Send + Sync),
        elapsed: Duration,
    },
}

impl<Q> BatchEvent<'_, Q> {
    /// Stable short name, used for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Enqueued { .. } => "enqueued",
            Self::FetchStarted { .. } => "fetch_started",
            Self::DataReceived { .. } => "data_received",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Receives batch lifecycle events
pub trait BatchObserver<Q>: Send + Sync {
    fn on_event(&self, loader: &str, sequence: u64, event: &BatchEvent<'_, Q>);
}

/// Logs every event at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl<Q: fmt::Debug> BatchObserver<Q> for TracingObserver {
    fn on_event(&self, loader: &str, sequence: u64, event: &BatchEvent<'_, Q>) {
        match event {
            BatchEvent::Created => {
                debug!(loader, sequence, "Batch created");
            }
            BatchEvent::Enqueued {
                query,
                duplicate,
                pending,
                delay,
            } => {
                debug!(
                    loader,
                    sequence,
                    query = ?query,
                    duplicate,
                    pending = pending.len(),
                    delay_ms = delay.as_millis() as u64,
                    "Query enqueued"
                );
            }
            BatchEvent::FetchStarted { queries } => {
                debug!(loader, sequence, batch_size = queries.len(), "Fetch started");
            }
            BatchEvent::DataReceived { elapsed } => {
                debug!(loader, sequence, elapsed_ms = elapsed.as_millis() as u64, "Data received");
            }
            BatchEvent::Failed { error, elapsed } => {
                debug!(
                    loader,
                    sequence,
                    error = %error,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Fetch failed"
                );
            }
        }
    }
}

/// Forwards each event to several observers, in order
pub struct FanOut<Q> {
    observers: Vec<Arc<dyn BatchObserver<Q>>>,
}

impl<Q> FanOut<Q> {
    pub fn new(observers: Vec<Arc<dyn BatchObserver<Q>>>) -> Self {
        Self { observers }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<Q> BatchObserver<Q> for FanOut<Q> {
    fn on_event(&self, loader: &str, sequence: u64, event: &BatchEvent<'_, Q>) {
        for observer in &self.observers {
            observer.on_event(loader, sequence, event);
        }
    }
}
