//! One network round trip worth of rows.

use std::sync::Arc;

use tessera_types::{ColumnSpec, PagingState, Row};
use uuid::Uuid;

/// Ancillary metadata the coordinator returns with a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionInfo {
    /// Trace session id when tracing was requested.
    pub tracing_id: Option<Uuid>,
    /// Server-side warnings attached to the response.
    pub warnings: Vec<String>,
}

/// A batch of rows returned by one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPage {
    columns: Arc<[ColumnSpec]>,
    rows: Vec<Row>,
    paging_state: Option<PagingState>,
    info: ExecutionInfo,
}

impl ResultPage {
    pub fn new(
        columns: Arc<[ColumnSpec]>,
        rows: Vec<Row>,
        paging_state: Option<PagingState>,
        info: ExecutionInfo,
    ) -> Self {
        Self {
            columns,
            rows,
            paging_state,
            info,
        }
    }

    /// A page with no rows and no continuation, as returned by most writes.
    pub fn empty() -> Self {
        Self::new(Arc::from(Vec::new()), Vec::new(), None, ExecutionInfo::default())
    }

    pub fn columns(&self) -> &Arc<[ColumnSpec]> {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True while the store may hold further pages.
    pub fn has_more_pages(&self) -> bool {
        self.paging_state.is_some()
    }

    pub fn paging_state(&self) -> Option<&PagingState> {
        self.paging_state.as_ref()
    }

    pub fn info(&self) -> &ExecutionInfo {
        &self.info
    }

    /// Appends the rows of `next` and takes over its continuation.
    pub(crate) fn absorb(&mut self, next: ResultPage) {
        self.rows.extend(next.rows);
        self.paging_state = next.paging_state;
    }

    /// Splits the page into its rows, continuation and execution info.
    pub fn into_parts(self) -> (Vec<Row>, Option<PagingState>, ExecutionInfo) {
        (self.rows, self.paging_state, self.info)
    }
}
