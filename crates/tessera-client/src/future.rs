//! Bridge from callback completion to awaitable futures.
//!
//! The network client reports results by invoking a [`Callback`] on a thread
//! of its choosing. [`bridge`] pairs a [`Completer`], which adapts into such a
//! callback, with a [`ResultFuture`] the caller awaits or attaches a listener
//! to. Exactly one outcome is delivered, exactly once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{QueryError, Result};
use crate::network::{Callback, NetworkError};
use crate::pool::WorkerPool;

/// Creates a connected completer/future pair.
pub fn bridge<T: Send + 'static>(pool: &WorkerPool) -> (Completer<T>, ResultFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer { tx: Some(tx) },
        ResultFuture {
            rx,
            pool: pool.clone(),
        },
    )
}

/// Starts a network call and returns the future of its result.
///
/// `start` receives the callback to hand to the network client.
pub fn dispatch<T, F>(pool: &WorkerPool, start: F) -> ResultFuture<T>
where
    T: Send + 'static,
    F: FnOnce(Callback<T>),
{
    let (completer, future) = bridge(pool);
    start(completer.into_callback());
    future
}

/// Write side of a bridged future.
///
/// Dropping a completer without resolving it fails the future with
/// [`NetworkError::Dropped`].
pub struct Completer<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T: Send + 'static> Completer<T> {
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: QueryError) {
        self.complete(Err(error));
    }

    pub fn complete(mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            // The receiver may already be gone; nobody is left to notify.
            let _ = tx.send(result);
        }
    }

    /// Adapts the completer into a network callback. Network failures are
    /// unwrapped to their root cause.
    pub fn into_callback(self) -> Callback<T> {
        Box::new(move |result| self.complete(result.map_err(QueryError::from)))
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(QueryError::Transport(NetworkError::Dropped)));
        }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("resolved", &self.tx.is_none())
            .finish()
    }
}

/// Read side of a bridged future.
#[must_use = "futures do nothing unless awaited or given a listener"]
pub struct ResultFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
    pool: WorkerPool,
}

impl<T: Send + 'static> ResultFuture<T> {
    /// A future that is already resolved.
    pub fn ready(pool: &WorkerPool, result: Result<T>) -> Self {
        let (completer, future) = bridge(pool);
        completer.complete(result);
        future
    }

    /// Runs `listener` on the worker pool once the outcome is known.
    ///
    /// A listener attached after completion is invoked right away with the
    /// stored outcome.
    pub fn on_complete<F>(self, listener: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let pool = self.pool.clone();
        drop(pool.spawn(async move { listener(self.await) }));
    }

    /// Blocks the calling thread until the outcome is known or `timeout`
    /// passes.
    ///
    /// Must not be called from a worker of the pool this future completes on.
    pub fn wait(self, timeout: Duration) -> Result<T> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.on_complete(move |result| {
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "blocking wait timed out");
                Err(QueryError::Timeout(timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(QueryError::Transport(NetworkError::Dropped))
            }
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl<T> Future for ResultFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or(Err(QueryError::Transport(NetworkError::Dropped)))
        })
    }
}

impl<T> fmt::Debug for ResultFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultFuture").finish_non_exhaustive()
    }
}
