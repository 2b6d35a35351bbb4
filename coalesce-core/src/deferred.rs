//! Externally settled shared results.
//!
//! A [`deferred`] pair splits one eventual outcome into a [`Settle`] handle,
//! consumed exactly once by whoever produces the value, and an [`Outcome`]
//! that any number of waiters clone and await. Every waiter observes the same
//! `Arc`-wrapped value or error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::error::LoadError;

type Settled<T, E> = Result<Arc<T>, LoadError<E>>;

/// Create a fresh settle/outcome pair.
pub fn deferred<T, E>() -> (Settle<T, E>, Outcome<T, E>)
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let (tx, rx) = oneshot::channel::<Result<Arc<T>, Arc<E>>>();

    let wait = async move {
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(LoadError::Fetch(error)),
            // Sender dropped without settling
            Err(_) => Err(LoadError::Abandoned),
        }
    };

    (Settle { tx }, Outcome { inner: wait.boxed().shared() })
}

/// Write side of a deferred result. Settling consumes the handle.
pub struct Settle<T, E> {
    tx: oneshot::Sender<Result<Arc<T>, Arc<E>>>,
}

impl<T, E> Settle<T, E> {
    pub fn resolve(self, value: T) {
        // No waiters left is not an error
        let _ = self.tx.send(Ok(Arc::new(value)));
    }

    pub fn reject(self, error: E) {
        let _ = self.tx.send(Err(Arc::new(error)));
    }

    pub fn settle(self, result: Result<T, E>) {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }
}

/// Read side of a deferred result. Cheap to clone; all clones resolve together.
pub struct Outcome<T, E> {
    inner: Shared<BoxFuture<'static, Settled<T, E>>>,
}

impl<T, E> Outcome<T, E> {
    /// Whether the outcome has been observed as settled by some waiter
    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }
}

impl<T, E> Clone for Outcome<T, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, E> Future for Outcome<T, E> {
    type Output = Settled<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}
