//! Buffered cursor over a paged result.
//!
//! The cursor holds the rows fetched so far plus the paging state needed to
//! ask for more. At most one page request is outstanding; callers of
//! [`PagedResultCursor::fetch_more`] that arrive while one is in flight wait on
//! the same request.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tessera_types::{ColumnSpec, PagingState, Row};
use tokio::sync::watch;

use crate::context::ExecutionContext;
use crate::error::{QueryError, Result};
use crate::network::NetworkError;
use crate::page::{ExecutionInfo, ResultPage};
use crate::pool::WorkerPool;
use crate::statement::Statement;

/// Outcome slot of an in-flight fetch; `None` until it finishes.
type FetchOutcome = Option<Result<()>>;

struct CursorState {
    buffer: VecDeque<Row>,
    paging_state: Option<PagingState>,
    info: ExecutionInfo,
    in_flight: Option<watch::Receiver<FetchOutcome>>,
}

struct CursorInner {
    context: ExecutionContext,
    statement: Statement,
    columns: Arc<[ColumnSpec]>,
    state: Mutex<CursorState>,
}

/// Cursor over the rows of one statement. Cheap to clone; clones share the
/// buffer.
#[derive(Clone)]
pub struct PagedResultCursor {
    inner: Arc<CursorInner>,
}

impl PagedResultCursor {
    /// Wraps the first page of `statement`'s result.
    ///
    /// `statement` must be the one that produced `first_page`, with settings
    /// already applied, since later pages are requested with it.
    pub fn new(context: ExecutionContext, statement: Statement, first_page: ResultPage) -> Self {
        let columns = Arc::clone(first_page.columns());
        let (rows, paging_state, info) = first_page.into_parts();
        Self {
            inner: Arc::new(CursorInner {
                context,
                statement,
                columns,
                state: Mutex::new(CursorState {
                    buffer: rows.into(),
                    paging_state,
                    info,
                    in_flight: None,
                }),
            }),
        }
    }

    /// True iff a row is buffered. Says nothing about later pages.
    pub fn has_next(&self) -> bool {
        !self.inner.lock().buffer.is_empty()
    }

    /// Takes the next buffered row, or `None` when the buffer is empty.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Option<Row> {
        self.inner.lock().buffer.pop_front()
    }

    /// Rows buffered and not yet taken.
    pub fn available_without_fetching(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// True once the store reported that no further pages exist.
    pub fn is_fully_fetched(&self) -> bool {
        self.inner.lock().paging_state.is_none()
    }

    /// Buffered row count and whether the cursor is fully fetched, read
    /// together so a fetch landing in between cannot be missed.
    pub(crate) fn snapshot(&self) -> (usize, bool) {
        let state = self.inner.lock();
        (state.buffer.len(), state.paging_state.is_none())
    }

    /// True while a page request is outstanding.
    pub fn is_fetching(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    pub fn columns(&self) -> &Arc<[ColumnSpec]> {
        &self.inner.columns
    }

    /// Execution info of the most recent page.
    pub fn info(&self) -> ExecutionInfo {
        self.inner.lock().info.clone()
    }

    pub fn statement(&self) -> &Statement {
        &self.inner.statement
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        self.inner.context.pool()
    }

    /// Requests the next page. The returned future resolves once its rows are
    /// appended to the buffer.
    ///
    /// Joins the outstanding request if there is one, and resolves at once
    /// when the cursor is fully fetched. A failed fetch is reported to every
    /// waiter and leaves the cursor ready for another attempt.
    pub fn fetch_more(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let waiter = self.start_fetch();
        async move {
            let Some(mut rx) = waiter else {
                return Ok(());
            };
            match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
                Err(_) => Err(QueryError::Transport(NetworkError::Dropped)),
            }
        }
    }

    fn start_fetch(&self) -> Option<watch::Receiver<FetchOutcome>> {
        let (tx, rx, paging_state) = {
            let mut state = self.inner.lock();
            if let Some(rx) = &state.in_flight {
                return Some(rx.clone());
            }
            let paging_state = state.paging_state.clone()?;
            let (tx, rx) = watch::channel(None);
            state.in_flight = Some(rx.clone());
            (tx, rx, paging_state)
        };

        let page = self
            .inner
            .context
            .fetch_page(&self.inner.statement, &paging_state);
        let inner = Arc::clone(&self.inner);
        drop(self.inner.context.pool().spawn(async move {
            let outcome = inner.absorb(page.await);
            tx.send_replace(Some(outcome));
        }));

        Some(rx)
    }
}

impl CursorInner {
    fn lock(&self) -> MutexGuard<'_, CursorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a fetched page and clears the in-flight slot in one step, so a
    /// caller never sees the slot empty with the rows still missing.
    fn absorb(&self, fetched: Result<ResultPage>) -> Result<()> {
        let mut state = self.lock();
        state.in_flight = None;
        match fetched {
            Ok(page) => {
                let (rows, paging_state, info) = page.into_parts();
                tracing::debug!(
                    rows = rows.len(),
                    more = paging_state.is_some(),
                    "page appended"
                );
                state.buffer.extend(rows);
                state.paging_state = paging_state;
                state.info = info;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, query = self.statement.query_text(), "page fetch failed");
                Err(error)
            }
        }
    }
}

impl fmt::Debug for PagedResultCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("PagedResultCursor")
            .field("buffered", &state.buffer.len())
            .field("fully_fetched", &state.paging_state.is_none())
            .field("fetching", &state.in_flight.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryClient, users_table};
    use crate::network::NetworkClient;
    use std::time::Duration;
    use tessera_types::Value;

    async fn cursor_over(rows: i64, page_size: u32) -> (Arc<MemoryClient>, PagedResultCursor) {
        let pool = WorkerPool::current();
        let client = Arc::new(MemoryClient::new(&pool));
        client.create_table(users_table()).unwrap();
        for id in 0..rows {
            client.insert_row("users", vec![Value::BigInt(id), format!("user-{id}").into()])
                .unwrap();
        }

        let context = ExecutionContext::new(Arc::clone(&client) as Arc<dyn NetworkClient>, pool);
        let statement =
            context.apply_settings(Statement::new("SELECT * FROM users").with_page_size(page_size));
        let first = context.perform_async(statement.clone()).await.unwrap();
        (client, PagedResultCursor::new(context, statement, first))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_page_is_buffered() {
        let (_, cursor) = cursor_over(25, 10).await;

        assert!(cursor.has_next());
        assert_eq!(cursor.available_without_fetching(), 10);
        assert!(!cursor.is_fully_fetched());
        assert_eq!(cursor.next().unwrap().get(0), Some(&Value::BigInt(0)));
        assert_eq!(cursor.available_without_fetching(), 9);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_more_appends_until_fully_fetched() {
        let (client, cursor) = cursor_over(25, 10).await;

        cursor.fetch_more().await.unwrap();
        assert_eq!(cursor.available_without_fetching(), 20);
        cursor.fetch_more().await.unwrap();
        assert_eq!(cursor.available_without_fetching(), 25);
        assert!(cursor.is_fully_fetched());

        cursor.fetch_more().await.unwrap();
        assert_eq!(client.stats().page_fetches, 2);

        let ids: Vec<i64> = std::iter::from_fn(|| cursor.next())
            .map(|row| row.get(0).and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(ids, (0..25).collect::<Vec<_>>());
        assert!(!cursor.has_next());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_fetches_share_one_request() {
        let (client, cursor) = cursor_over(25, 10).await;
        client.set_latency(Duration::from_millis(50));

        let first = cursor.fetch_more();
        let second = cursor.fetch_more();
        assert!(cursor.is_fetching());

        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();

        assert_eq!(client.stats().page_fetches, 1);
        assert_eq!(cursor.available_without_fetching(), 20);
        assert!(!cursor.is_fetching());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_fetch_reaches_every_waiter() {
        let (client, cursor) = cursor_over(25, 10).await;
        client.set_latency(Duration::from_millis(50));
        client.fail_next_fetch(NetworkError::Timeout(Duration::from_secs(1)));

        let (a, b) = tokio::join!(cursor.fetch_more(), cursor.fetch_more());
        assert!(a.unwrap_err().is_transport());
        assert!(b.unwrap_err().is_transport());
        assert!(!cursor.is_fetching());

        cursor.fetch_more().await.unwrap();
        assert_eq!(cursor.available_without_fetching(), 20);
    }
}
