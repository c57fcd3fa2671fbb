//! Demand-driven delivery of a paged result.
//!
//! A [`RowStream`] accepts one [`Subscriber`]. The subscriber signals how many
//! rows it is ready for through [`Subscription::request`]; rows are delivered
//! from the cursor's buffer, and pages are fetched as the buffer runs dry.
//!
//! Demand processing runs as a drain loop guarded by a work-in-progress
//! counter. Whoever moves the counter off zero drains; everyone else records
//! that another pass is needed and returns. Only one thread ever takes rows
//! from the cursor or decrements demand, and subscriber callbacks may call
//! `request` or `cancel` reentrantly without deadlocking.
//!
//! Terminal signals go through the same loop. `cancel` and failures only
//! record why the stream closes; the draining thread emits `on_complete` or
//! `on_error`, so no `on_next` can follow them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tessera_types::Row;

use crate::cursor::PagedResultCursor;
use crate::error::QueryError;

/// Demand value meaning "no limit". Never decremented.
pub const UNBOUNDED: u64 = u64::MAX;

/// Receives the rows of a stream.
///
/// After `on_subscribe`, the subscriber gets `on_next` at most as many times as
/// it requested, followed by at most one of `on_complete` or `on_error`.
pub trait Subscriber: Send + Sync + 'static {
    /// Hands over the subscription used to request rows or cancel.
    fn on_subscribe(&self, subscription: Subscription);

    fn on_next(&self, row: Row);

    fn on_error(&self, error: QueryError);

    fn on_complete(&self);
}

/// A multi-row result exposed as a single-subscriber stream.
pub struct RowStream {
    cursor: PagedResultCursor,
    subscribed: AtomicBool,
}

impl RowStream {
    pub fn new(cursor: PagedResultCursor) -> Self {
        Self {
            cursor,
            subscribed: AtomicBool::new(false),
        }
    }

    /// Attaches `subscriber`. A stream accepts exactly one subscriber; later
    /// attempts receive `on_error` and leave the first subscription alone.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            tracing::warn!("rejected duplicate subscribe");
            subscriber.on_error(QueryError::SubscriptionProtocol(
                "stream already has a subscriber".to_string(),
            ));
            return;
        }

        let subscription = Subscription {
            inner: Arc::new(Inner {
                cursor: self.cursor.clone(),
                subscriber: Mutex::new(Some(Arc::clone(&subscriber))),
                demand: AtomicU64::new(0),
                wip: AtomicUsize::new(0),
                terminated: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                awaiting_fetch: AtomicBool::new(false),
            }),
        };
        subscriber.on_subscribe(subscription);
    }

    pub fn cursor(&self) -> &PagedResultCursor {
        &self.cursor
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("cursor", &self.cursor)
            .field("subscribed", &self.subscribed.load(Ordering::Acquire))
            .finish()
    }
}

struct Inner {
    cursor: PagedResultCursor,
    /// Taken on termination, which also breaks the subscriber/subscription
    /// reference cycle.
    subscriber: Mutex<Option<Arc<dyn Subscriber>>>,
    demand: AtomicU64,
    wip: AtomicUsize,
    terminated: AtomicBool,
    /// Set once a close reason is recorded, ahead of `terminated`.
    closing: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    awaiting_fetch: AtomicBool,
}

enum CloseReason {
    Cancelled,
    Failed(QueryError),
}

/// Handle a subscriber uses to signal demand. Cheap to clone.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    /// Signals readiness for `n` more rows.
    ///
    /// `n == 0` violates the protocol: the subscriber receives `on_error` and
    /// the subscription terminates. Requests after termination are ignored.
    pub fn request(&self, n: u64) {
        let inner = &self.inner;
        if inner.is_closed() {
            return;
        }
        if n == 0 {
            tracing::warn!("request(0) on subscription");
            inner.fail(QueryError::SubscriptionProtocol(
                "request(n) requires n > 0".to_string(),
            ));
            return;
        }

        let _ = inner
            .demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                Some(d.saturating_add(n))
            });
        inner.drain();
    }

    /// Stops delivery and signals completion. Idempotent, and safe to call
    /// from inside any subscriber callback. A fetch already in flight runs to
    /// completion and its rows are dropped.
    ///
    /// While another thread is delivering, `on_complete` arrives from that
    /// thread once its current `on_next` returns.
    pub fn cancel(&self) {
        self.inner.close(CloseReason::Cancelled);
    }

    /// True once the subscription is closing or closed, by cancel,
    /// exhaustion or error.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_closed()
    }

    /// Rows requested and not yet delivered.
    pub fn demand(&self) -> u64 {
        self.inner.demand.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("demand", &self.demand())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn drain(self: &Arc<Self>) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }

        let mut missed = 1;
        loop {
            self.process_demand();
            let previous = self.wip.fetch_sub(missed, Ordering::AcqRel);
            missed = previous - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn process_demand(self: &Arc<Self>) {
        loop {
            if self.terminated.load(Ordering::Acquire) {
                return;
            }
            if self.closing.load(Ordering::Acquire) {
                self.signal_close();
                return;
            }

            let (available, fully_fetched) = self.cursor.snapshot();
            if available == 0 {
                if fully_fetched {
                    if let Some(subscriber) = self.terminate() {
                        tracing::debug!("stream exhausted");
                        subscriber.on_complete();
                    }
                } else {
                    self.request_page();
                }
                return;
            }

            let demand = self.demand.load(Ordering::Acquire);
            if demand == 0 {
                return;
            }
            let Some(subscriber) = self.subscriber() else {
                return;
            };

            let batch = u64::try_from(available).map_or(demand, |a| a.min(demand));
            for _ in 0..batch {
                if self.closing.load(Ordering::Acquire) {
                    break;
                }
                let Some(row) = self.cursor.next() else {
                    break;
                };
                self.consume_demand();
                tracing::trace!("delivering row");
                subscriber.on_next(row);
            }
        }
    }

    fn consume_demand(&self) {
        let _ = self
            .demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| match d {
                0 | UNBOUNDED => None,
                d => Some(d - 1),
            });
    }

    fn request_page(self: &Arc<Self>) {
        if self.awaiting_fetch.swap(true, Ordering::AcqRel) {
            return;
        }

        let fetch = self.cursor.fetch_more();
        let inner = Arc::clone(self);
        drop(self.cursor.pool().spawn(async move {
            let outcome = fetch.await;
            inner.awaiting_fetch.store(false, Ordering::Release);
            match outcome {
                Ok(()) => inner.drain(),
                Err(error) => inner.fail(error),
            }
        }));
    }

    fn fail(self: &Arc<Self>, error: QueryError) {
        self.close(CloseReason::Failed(error));
    }

    /// Records why the stream closes, keeping the first reason, and lets the
    /// drain loop signal it.
    fn close(self: &Arc<Self>, reason: CloseReason) {
        {
            let mut slot = self.lock_close_reason();
            if slot.is_some() || self.terminated.load(Ordering::Acquire) {
                return;
            }
            *slot = Some(reason);
            self.closing.store(true, Ordering::Release);
        }
        self.drain();
    }

    /// Emits the recorded close reason. Only called from the drain loop.
    fn signal_close(&self) {
        let reason = self.lock_close_reason().take();
        let Some(subscriber) = self.terminate() else {
            return;
        };
        match reason {
            Some(CloseReason::Failed(error)) => {
                tracing::warn!(%error, "stream failed");
                subscriber.on_error(error);
            }
            Some(CloseReason::Cancelled) | None => {
                tracing::debug!("subscription cancelled");
                subscriber.on_complete();
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.terminated.load(Ordering::Acquire)
    }

    /// Moves to the terminal state. Returns the subscriber to notify, exactly
    /// once.
    fn terminate(&self) -> Option<Arc<dyn Subscriber>> {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.lock_subscriber().take()
    }

    fn subscriber(&self) -> Option<Arc<dyn Subscriber>> {
        self.lock_subscriber().clone()
    }

    fn lock_close_reason(&self) -> MutexGuard<'_, Option<CloseReason>> {
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscriber(&self) -> MutexGuard<'_, Option<Arc<dyn Subscriber>>> {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::memory::{MemoryClient, users_table};
    use crate::network::NetworkClient;
    use crate::pool::WorkerPool;
    use crate::statement::Statement;
    use std::time::Duration;
    use tessera_types::Value;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq)]
    enum Signal {
        Next(i64),
        Error(String),
        Complete,
    }

    #[derive(Default)]
    struct Recorder {
        subscription: Mutex<Option<Subscription>>,
        signals: Mutex<Vec<Signal>>,
        cancel_after: Option<usize>,
        done: Notify,
    }

    impl Recorder {
        fn cancelling_after(rows: usize) -> Self {
            Self {
                cancel_after: Some(rows),
                ..Self::default()
            }
        }

        fn subscription(&self) -> Subscription {
            self.subscription.lock().unwrap().clone().unwrap()
        }

        fn signals(&self) -> Vec<Signal> {
            self.signals.lock().unwrap().clone()
        }

        fn delivered(&self) -> usize {
            self.signals()
                .iter()
                .filter(|s| matches!(s, Signal::Next(_)))
                .count()
        }
    }

    impl Subscriber for Recorder {
        fn on_subscribe(&self, subscription: Subscription) {
            *self.subscription.lock().unwrap() = Some(subscription);
        }

        fn on_next(&self, row: Row) {
            let id = row.get(0).and_then(Value::as_i64).unwrap();
            let count = {
                let mut signals = self.signals.lock().unwrap();
                signals.push(Signal::Next(id));
                signals.len()
            };
            if self.cancel_after == Some(count) {
                let subscription = self.subscription();
                subscription.cancel();
                subscription.cancel();
            }
        }

        fn on_error(&self, error: QueryError) {
            self.signals.lock().unwrap().push(Signal::Error(error.to_string()));
            self.done.notify_one();
        }

        fn on_complete(&self) {
            self.signals.lock().unwrap().push(Signal::Complete);
            self.done.notify_one();
        }
    }

    async fn stream_of(rows: i64, page_size: u32) -> (Arc<MemoryClient>, RowStream) {
        let pool = WorkerPool::current();
        let client = Arc::new(MemoryClient::new(&pool));
        client.create_table(users_table()).unwrap();
        for id in 0..rows {
            client.insert_row("users", vec![Value::BigInt(id), format!("u{id}").into()])
                .unwrap();
        }
        let context = ExecutionContext::new(Arc::clone(&client) as Arc<dyn NetworkClient>, pool);
        let statement =
            context.apply_settings(Statement::new("SELECT * FROM users").with_page_size(page_size));
        let first = context.perform_async(statement.clone()).await.unwrap();
        let cursor = PagedResultCursor::new(context, statement, first);
        (client, RowStream::new(cursor))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivers_exactly_the_requested_rows() {
        let (_, stream) = stream_of(8, 10).await;
        let recorder = Arc::new(Recorder::default());
        stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

        recorder.subscription().request(3);

        assert_eq!(
            recorder.signals(),
            vec![Signal::Next(0), Signal::Next(1), Signal::Next(2)]
        );
        assert_eq!(recorder.subscription().demand(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completes_eagerly_when_last_row_is_delivered() {
        let (_, stream) = stream_of(3, 10).await;
        let recorder = Arc::new(Recorder::default());
        stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

        recorder.subscription().request(3);

        assert_eq!(recorder.delivered(), 3);
        assert_eq!(recorder.signals().last(), Some(&Signal::Complete));
        assert!(recorder.subscription().is_cancelled());

        recorder.subscription().request(5);
        assert_eq!(recorder.signals().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_subscribe_errors_only_the_newcomer() {
        let (_, stream) = stream_of(4, 10).await;
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        stream.subscribe(Arc::clone(&first) as Arc<dyn Subscriber>);
        stream.subscribe(Arc::clone(&second) as Arc<dyn Subscriber>);

        assert!(matches!(second.signals().as_slice(), [Signal::Error(_)]));
        assert!(second.subscription.lock().unwrap().is_none());

        first.subscription().request(2);
        assert_eq!(first.signals(), vec![Signal::Next(0), Signal::Next(1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_request_is_a_protocol_error() {
        let (_, stream) = stream_of(4, 10).await;
        let recorder = Arc::new(Recorder::default());
        stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

        recorder.subscription().request(0);
        recorder.subscription().request(2);

        match recorder.signals().as_slice() {
            [Signal::Error(message)] => assert!(message.contains("n > 0")),
            other => panic!("unexpected signals: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_from_on_next_stops_delivery_once() {
        let (_, stream) = stream_of(10, 10).await;
        let recorder = Arc::new(Recorder::cancelling_after(2));
        stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

        recorder.subscription().request(8);

        assert_eq!(
            recorder.signals(),
            vec![Signal::Next(0), Signal::Next(1), Signal::Complete]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_failure_terminates_with_error() {
        let (client, stream) = stream_of(15, 10).await;
        client.fail_next_fetch(crate::network::NetworkError::Connection("reset".into()));
        let recorder = Arc::new(Recorder::default());
        stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

        let done = recorder.done.notified();
        recorder.subscription().request(12);
        tokio::time::timeout(Duration::from_secs(5), done).await.unwrap();

        let signals = recorder.signals();
        assert_eq!(recorder.delivered(), 10);
        assert!(matches!(signals.last(), Some(Signal::Error(m)) if m.contains("reset")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unbounded_demand_drains_every_page() {
        let (client, stream) = stream_of(23, 5).await;
        let recorder = Arc::new(Recorder::default());
        stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

        let done = recorder.done.notified();
        recorder.subscription().request(UNBOUNDED);
        tokio::time::timeout(Duration::from_secs(5), done).await.unwrap();

        assert_eq!(recorder.delivered(), 23);
        assert_eq!(recorder.signals().last(), Some(&Signal::Complete));
        assert_eq!(recorder.subscription().demand(), UNBOUNDED);
        assert_eq!(client.stats().page_fetches, 4);
    }
}
