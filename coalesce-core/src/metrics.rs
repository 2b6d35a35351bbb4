//! Metrics for loaders.
//!
//! [`LoaderMetrics`] is itself a [`BatchObserver`]: inject an
//! `Arc<LoaderMetrics>` into a loader and keep a clone for snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::observer::{BatchEvent, BatchObserver};

/// Counters for monitoring batching efficiency
#[derive(Debug, Default)]
pub struct LoaderMetrics {
    /// Total fetch calls made by callers
    pub queries_received: AtomicU64,

    /// Fetch calls that matched a query already pending
    pub queries_deduplicated: AtomicU64,

    /// Batches handed to the batch function
    pub batches_dispatched: AtomicU64,

    /// Batches whose fetch succeeded
    pub batches_succeeded: AtomicU64,

    /// Batches whose fetch failed
    pub batches_failed: AtomicU64,

    /// Distinct queries across all dispatched batches (for averaging)
    pub total_batch_queries: AtomicU64,

    /// Largest batch dispatched
    pub max_batch_size: AtomicU64,

    /// Total fetch time in milliseconds (for averaging)
    pub total_fetch_ms: AtomicU64,
}

impl LoaderMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a caller's fetch
    pub fn record_query(&self, duplicate: bool) {
        self.queries_received.fetch_add(1, Ordering::Relaxed);
        if duplicate {
            self.queries_deduplicated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a batch being dispatched
    pub fn record_dispatch(&self, batch_size: usize) {
        let size = batch_size as u64;
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_batch_queries.fetch_add(size, Ordering::Relaxed);

        let mut current_max = self.max_batch_size.load(Ordering::Relaxed);
        while size > current_max {
            match self.max_batch_size.compare_exchange_weak(
                current_max,
                size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    /// Record a batch fetch completing
    pub fn record_completion(&self, elapsed: Duration, success: bool) {
        if success {
            self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batches_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_fetch_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Batches dispatched but not yet settled
    pub fn in_flight(&self) -> u64 {
        let dispatched = self.batches_dispatched.load(Ordering::Relaxed);
        let settled = self.batches_succeeded.load(Ordering::Relaxed)
            + self.batches_failed.load(Ordering::Relaxed);
        dispatched.saturating_sub(settled)
    }

    /// Calculate average batch size
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        self.total_batch_queries.load(Ordering::Relaxed) as f64 / batches as f64
    }

    /// Calculate average fetch time in milliseconds
    pub fn avg_fetch_ms(&self) -> f64 {
        let settled = self.batches_succeeded.load(Ordering::Relaxed)
            + self.batches_failed.load(Ordering::Relaxed);
        if settled == 0 {
            return 0.0;
        }
        self.total_fetch_ms.load(Ordering::Relaxed) as f64 / settled as f64
    }

    /// Caller queries received per dispatched batch
    pub fn coalescing_ratio(&self) -> f64 {
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        self.queries_received.load(Ordering::Relaxed) as f64 / batches as f64
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_received: self.queries_received.load(Ordering::Relaxed),
            queries_deduplicated: self.queries_deduplicated.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_in_flight: self.in_flight(),
            max_batch_size: self.max_batch_size.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
            avg_fetch_ms: self.avg_fetch_ms(),
            coalescing_ratio: self.coalescing_ratio(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.queries_received.store(0, Ordering::Relaxed);
        self.queries_deduplicated.store(0, Ordering::Relaxed);
        self.batches_dispatched.store(0, Ordering::Relaxed);
        self.batches_succeeded.store(0, Ordering::Relaxed);
        self.batches_failed.store(0, Ordering::Relaxed);
        self.total_batch_queries.store(0, Ordering::Relaxed);
        self.max_batch_size.store(0, Ordering::Relaxed);
        self.total_fetch_ms.store(0, Ordering::Relaxed);
    }
}

impl<Q> BatchObserver<Q> for LoaderMetrics {
    fn on_event(&self, _loader: &str, _sequence: u64, event: &BatchEvent<'_, Q>) {
        match event {
            BatchEvent::Created => {}
            BatchEvent::Enqueued { duplicate, .. } => self.record_query(*duplicate),
            BatchEvent::FetchStarted { queries } => self.record_dispatch(queries.len()),
            BatchEvent::DataReceived { elapsed } => self.record_completion(*elapsed, true),
            BatchEvent::Failed { elapsed, .. } => self.record_completion(*elapsed, false),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub queries_received: u64,
    pub queries_deduplicated: u64,
    pub batches_dispatched: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub batches_in_flight: u64,
    pub max_batch_size: u64,
    pub avg_batch_size: f64,
    pub avg_fetch_ms: f64,
    pub coalescing_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = LoaderMetrics::new();

        metrics.record_query(false);
        metrics.record_query(true);
        metrics.record_query(false);
        metrics.record_dispatch(2);
        assert_eq!(metrics.in_flight(), 1);

        metrics.record_completion(Duration::from_millis(40), true);
        assert_eq!(metrics.in_flight(), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_received, 3);
        assert_eq!(snapshot.queries_deduplicated, 1);
        assert_eq!(snapshot.batches_succeeded, 1);
        assert_eq!(snapshot.avg_batch_size, 2.0);
        assert_eq!(snapshot.avg_fetch_ms, 40.0);
        assert_eq!(snapshot.coalescing_ratio, 3.0);
    }

    #[test]
    fn test_max_batch_size() {
        let metrics = LoaderMetrics::new();

        metrics.record_dispatch(5);
        metrics.record_dispatch(2);
        metrics.record_dispatch(3);

        // Max should still be 5
        assert_eq!(metrics.max_batch_size.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.avg_batch_size(), 10.0 / 3.0);
    }

    #[test]
    fn test_observer_events_feed_counters() {
        let metrics = LoaderMetrics::new();
        let error = "unavailable".to_string();

        metrics.on_event("users", 0, &BatchEvent::<u32>::Created);
        metrics.on_event(
            "users",
            0,
            &BatchEvent::Enqueued {
                query: &1u32,
                duplicate: false,
                pending: &[1],
                delay: Duration::from_millis(10),
            },
        );
        metrics.on_event("users", 0, &BatchEvent::FetchStarted { queries: &[1u32] });
        let failed: BatchEvent<'_, u32> =
            BatchEvent::Failed { error: &error, elapsed: Duration::from_millis(4) };
        metrics.on_event("users", 0, &failed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_received, 1);
        assert_eq!(snapshot.batches_dispatched, 1);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.batches_in_flight, 0);
    }

    #[test]
    fn test_reset_and_serialize() {
        let metrics = LoaderMetrics::new();
        metrics.record_dispatch(4);
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_dispatched, 0);
        assert_eq!(snapshot.avg_batch_size, 0.0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["max_batch_size"], 0);
    }
}
