//! Shared worker pool for completion callbacks.
//!
//! Every completion (statement dispatch, page fetch, cache load) resumes on
//! this pool rather than on the thread that delivered the network callback.
//! There is no thread per query or per stream.
//!
//! The pool is passed explicitly to each execution context. It either owns a
//! dedicated multi-thread runtime or borrows the handle of one the
//! application already runs.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// Handle to the worker pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    _owned: Option<Arc<OwnedRuntime>>,
}

/// Shuts an owned runtime down without blocking, so the last handle may be
/// dropped from inside a worker.
#[derive(Debug)]
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl WorkerPool {
    /// Starts a dedicated pool with `worker_threads` threads.
    ///
    /// # Panics
    ///
    /// Panics if `worker_threads` is 0.
    pub fn new(worker_threads: usize) -> io::Result<Self> {
        assert!(worker_threads > 0, "worker_threads must be positive");

        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("tessera-worker")
            .enable_all()
            .build()?;

        tracing::debug!(worker_threads, "worker pool started");

        Ok(Self {
            handle: runtime.handle().clone(),
            _owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Uses an existing runtime's workers.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _owned: None,
        }
    }

    /// Uses the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Runs a future on the pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs a closure on the pool.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn(async move { f() }));
    }
}
