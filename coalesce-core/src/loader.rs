//! Batch orchestration.
//!
//! A [`Loader`] collects the queries of concurrent callers into one pending
//! batch, lets a [`TimingPolicy`] decide when that batch fires, runs the batch
//! function once for all of them and hands each caller its own value through
//! a [`Correlate`] strategy.
//!
//! # Lifecycle
//!
//! ```text
//!   fetch(q) ──► pending batch ◄── fetch(q') ...
//!                   │  (timer re-armed on every query)
//!                   ▼
//!               timer fires ──► detach batch, install a fresh one
//!                   │
//!                   ▼
//!            batch function(queries)
//!                   │
//!          Ok(data) │ Err(e)
//!                   ▼
//!        settle shared outcome ──► correlate per caller
//! ```
//!
//! Once a batch is detached, new queries start the next batch immediately,
//! even while the previous fetch is still running.
//!
//! # Example
//!
//! ```rust,no_run
//! use coalesce_core::correlate::ByField;
//! use coalesce_core::loader::Loader;
//! use coalesce_core::timing::Window;
//!
//! #[derive(Clone)]
//! struct User {
//!     id: u32,
//!     name: String,
//! }
//!
//! # async fn run() {
//! let loader = Loader::builder(
//!     |ids: Vec<u32>| async move {
//!         let users = ids.into_iter().map(|id| User { id, name: format!("user-{id}") });
//!         Ok::<_, String>(users.collect::<Vec<_>>())
//!     },
//!     ByField::new(|u: &User| u.id),
//! )
//! .name("users")
//! .policy(Window::from_millis(5))
//! .build();
//!
//! let (a, b) = tokio::join!(loader.fetch(1), loader.fetch(2));
//! assert_eq!(a.unwrap().unwrap().name, "user-1");
//! assert_eq!(b.unwrap().unwrap().name, "user-2");
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::LoaderConfig;
use crate::correlate::Correlate;
use crate::deferred::{deferred, Outcome, Settle};
use crate::error::LoadError;
use crate::observer::{BatchEvent, BatchObserver};
use crate::timing::{TimingPolicy, Window};

/// Name used when none is configured
pub const DEFAULT_NAME: &str = "loader";

/// The batch function: fetches every query of a batch in one call.
///
/// Implemented for any `Fn(Vec<Q>) -> impl Future<Output = Result<R, E>>`.
pub trait BatchFn<Q>: Send + Sync + 'static {
    type Output: Send + Sync + 'static;
    type Error: fmt::Display + Send + Sync + 'static;

    fn fetch(&self, queries: Vec<Q>) -> BoxFuture<'static, Result<Self::Output, Self::Error>>;
}

impl<Q, F, Fut, R, E> BatchFn<Q> for F
where
    F: Fn(Vec<Q>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    type Output = R;
    type Error = E;

    fn fetch(&self, queries: Vec<Q>) -> BoxFuture<'static, Result<R, E>> {
        Box::pin(self(queries))
    }
}

/// The queries collected since the last batch fired, with the outcome their
/// callers wait on
struct PendingBatch<Q, T, E> {
    /// Distinct queries in first-insertion order
    queries: Vec<Q>,
    seen: HashSet<Q>,
    settle: Settle<T, E>,
    outcome: Outcome<T, E>,
}

impl<Q, T, E> PendingBatch<Q, T, E>
where
    Q: Hash + Eq + Clone,
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn new() -> Self {
        let (settle, outcome) = deferred();
        Self {
            queries: Vec::new(),
            seen: HashSet::new(),
            settle,
            outcome,
        }
    }

    /// Returns false when an equal query is already pending
    fn insert(&mut self, query: &Q) -> bool {
        if self.seen.contains(query) {
            return false;
        }
        self.seen.insert(query.clone());
        self.queries.push(query.clone());
        true
    }
}

/// Mutable state behind the loader's lock
struct WindowState<Q, T, E> {
    batch: PendingBatch<Q, T, E>,
    /// First query of the pending batch; `None` when nothing is pending
    start: Option<Instant>,
    /// Most recent query of the pending batch
    latest: Option<Instant>,
    /// The single armed timer, if any
    timer: Option<JoinHandle<()>>,
    /// Bumped on every re-arm so a superseded timer can tell it lost
    generation: u64,
    /// Sequence number of the pending batch
    sequence: u64,
}

struct Inner<Q, F, C>
where
    F: BatchFn<Q>,
{
    name: String,
    fetcher: F,
    correlator: C,
    policy: Arc<dyn TimingPolicy>,
    observer: Option<Arc<dyn BatchObserver<Q>>>,
    state: Mutex<WindowState<Q, F::Output, F::Error>>,
}

/// Coalesces concurrent fetches into batched calls of a [`BatchFn`].
///
/// Cloning a loader is cheap and yields a handle to the same batches.
/// `fetch` must be called from within a tokio runtime.
pub struct Loader<Q, F, C>
where
    F: BatchFn<Q>,
{
    inner: Arc<Inner<Q, F, C>>,
}

impl<Q, F, C> Clone for Loader<Q, F, C>
where
    F: BatchFn<Q>,
{
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<Q, F, C> Loader<Q, F, C>
where
    Q: Hash + Eq + Clone + Send + Sync + 'static,
    F: BatchFn<Q>,
    C: Correlate<Q, F::Output> + 'static,
{
    /// Create a loader with the default window policy
    pub fn new(fetcher: F, correlator: C) -> Self {
        Self::builder(fetcher, correlator).build()
    }

    pub fn builder(fetcher: F, correlator: C) -> LoaderBuilder<Q, F, C> {
        LoaderBuilder {
            fetcher,
            correlator,
            name: None,
            policy: None,
            observer: None,
        }
    }

    /// Create a loader whose name and policy come from `config`
    pub fn from_config(config: &LoaderConfig, fetcher: F, correlator: C) -> Self {
        let mut builder = Self::builder(fetcher, correlator).shared_policy(config.timing_policy());
        if let Some(name) = &config.name {
            builder = builder.name(name.clone());
        }
        builder.build()
    }

    /// Fetch the value owed to `query`, batched with concurrent callers.
    ///
    /// Equal queries issued within one batch reach the batch function once.
    /// Every caller of a failed batch receives the same [`LoadError::Fetch`].
    pub async fn fetch(&self, query: Q) -> Result<C::Output, LoadError<F::Error>> {
        let outcome = self.inner.enqueue(&query);
        let data = outcome.await?;
        Ok(self.inner.correlator.correlate(&*data, &query))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of distinct queries waiting in the current batch
    pub fn pending(&self) -> usize {
        self.inner.lock_state().batch.queries.len()
    }

    /// Sequence number the current batch will fire with
    pub fn sequence(&self) -> u64 {
        self.inner.lock_state().sequence
    }

    /// Whether no batch is accumulating
    pub fn is_idle(&self) -> bool {
        self.inner.lock_state().start.is_none()
    }
}

impl<Q, F, C> Inner<Q, F, C>
where
    Q: Hash + Eq + Clone + Send + Sync + 'static,
    F: BatchFn<Q>,
    C: Correlate<Q, F::Output> + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, WindowState<Q, F::Output, F::Error>> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, sequence: u64, event: &BatchEvent<'_, Q>) {
        if let Some(observer) = &self.observer {
            observer.on_event(&self.name, sequence, event);
        }
    }

    /// Add `query` to the pending batch and re-arm the timer
    fn enqueue(self: &Arc<Self>, query: &Q) -> Outcome<F::Output, F::Error> {
        let mut state = self.lock_state();
        let now = Instant::now();

        let start = *state.start.get_or_insert(now);
        state.latest = Some(now);
        let duplicate = !state.batch.insert(query);

        let delay = self.policy.delay(start, now);
        self.arm(&mut state, delay);

        debug!(
            loader = %self.name,
            sequence = state.sequence,
            pending = state.batch.queries.len(),
            duplicate,
            delay_ms = delay.as_millis() as u64,
            "Query enqueued"
        );
        self.notify(
            state.sequence,
            &BatchEvent::Enqueued {
                query,
                duplicate,
                pending: &state.batch.queries,
                delay,
            },
        );

        state.batch.outcome.clone()
    }

    /// Cancel the armed timer, if any, and arm a new one for `delay`
    fn arm(self: &Arc<Self>, state: &mut WindowState<Q, F::Output, F::Error>, delay: Duration) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;

        let generation = state.generation;
        let inner = Arc::clone(self);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(generation).await;
        }));
    }

    /// Detach the pending batch, run the batch function and settle the outcome
    async fn fire(self: Arc<Self>, generation: u64) {
        let (batch, sequence) = {
            let mut state = self.lock_state();
            if state.generation != generation {
                trace!(loader = %self.name, generation, "Superseded timer exited");
                return;
            }
            // Drops this task's own handle; the fetch below can no longer be aborted
            state.timer = None;

            let sequence = state.sequence;
            state.sequence += 1;
            state.start = None;
            state.latest = None;
            let batch = std::mem::replace(&mut state.batch, PendingBatch::new());

            debug!(loader = %self.name, sequence = state.sequence, "Batch created");
            self.notify(state.sequence, &BatchEvent::Created);

            (batch, sequence)
        };

        let PendingBatch { queries, settle, .. } = batch;
        let batch_size = queries.len();

        debug!(loader = %self.name, sequence, batch_size, "Dispatching batch");
        self.notify(sequence, &BatchEvent::FetchStarted { queries: &queries });

        let started = Instant::now();
        let result = self.fetcher.fetch(queries).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                debug!(
                    loader = %self.name,
                    sequence,
                    batch_size,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Batch completed"
                );
                self.notify(sequence, &BatchEvent::DataReceived { elapsed });
            }
            Err(error) => {
                warn!(
                    loader = %self.name,
                    sequence,
                    batch_size,
                    error = %error,
                    "Batch fetch failed"
                );
                self.notify(sequence, &BatchEvent::Failed { error, elapsed });
            }
        }

        settle.settle(result);
    }
}

/// Builder for [`Loader`]
pub struct LoaderBuilder<Q, F, C> {
    fetcher: F,
    correlator: C,
    name: Option<String>,
    policy: Option<Arc<dyn TimingPolicy>>,
    observer: Option<Arc<dyn BatchObserver<Q>>>,
}

impl<Q, F, C> LoaderBuilder<Q, F, C>
where
    Q: Hash + Eq + Clone + Send + Sync + 'static,
    F: BatchFn<Q>,
    C: Correlate<Q, F::Output> + 'static,
{
    /// Label for logs and observer events
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Timing policy; defaults to a 10ms window
    pub fn policy(self, policy: impl TimingPolicy + 'static) -> Self {
        self.shared_policy(Arc::new(policy))
    }

    pub fn shared_policy(mut self, policy: Arc<dyn TimingPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn BatchObserver<Q>>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Loader<Q, F, C> {
        let inner = Inner {
            name: self.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            fetcher: self.fetcher,
            correlator: self.correlator,
            policy: self
                .policy
                .unwrap_or_else(|| Arc::new(Window(crate::config::DEFAULT_DELAY))),
            observer: self.observer,
            state: Mutex::new(WindowState {
                batch: PendingBatch::new(),
                start: None,
                latest: None,
                timer: None,
                generation: 0,
                sequence: 0,
            }),
        };
        inner.notify(0, &BatchEvent::Created);

        Loader { inner: Arc::new(inner) }
    }
}
