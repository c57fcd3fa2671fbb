//! Query facade tying the execution pieces together.

use tessera_types::{Row, Value};

use crate::codec::EntityCodec;
use crate::context::ExecutionContext;
use crate::cursor::PagedResultCursor;
use crate::error::Result;
use crate::mutation::{self, MutationResult};
use crate::page::ResultPage;
use crate::single_row::expect_single_row;
use crate::statement::Statement;
use crate::subscription::RowStream;

/// Entry point for running statements under one execution context.
#[derive(Debug, Clone)]
pub struct Session {
    context: ExecutionContext,
}

impl Session {
    pub fn new(context: ExecutionContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Returns a session whose context is derived from this one, for
    /// per-query settings.
    #[must_use]
    pub fn with_context(&self, derive: impl FnOnce(&ExecutionContext) -> ExecutionContext) -> Self {
        Self {
            context: derive(&self.context),
        }
    }

    /// Executes `statement` and returns its first page.
    pub async fn execute(&self, statement: Statement) -> Result<ResultPage> {
        self.context.perform_async(statement).await
    }

    /// Blocking form of [`Session::execute`], bounded by the context's
    /// blocking timeout.
    ///
    /// Must not be called from a worker of the session's pool.
    pub fn execute_blocking(&self, statement: Statement) -> Result<ResultPage> {
        self.context
            .perform_async(statement)
            .wait(self.context.blocking_timeout())
    }

    /// Executes `statement` and returns a cursor over all of its pages.
    pub async fn cursor(&self, statement: Statement) -> Result<PagedResultCursor> {
        let statement = self.context.apply_settings(statement);
        let first = self.context.perform_async(statement.clone()).await?;
        Ok(PagedResultCursor::new(self.context.clone(), statement, first))
    }

    /// Executes `statement` and exposes its rows as a demand-driven stream.
    pub async fn stream(&self, statement: Statement) -> Result<RowStream> {
        self.cursor(statement).await.map(RowStream::new)
    }

    /// Executes a read addressed by primary key.
    ///
    /// Later pages are fetched until a second row shows up or the result is
    /// exhausted, so a paged answer cannot hide extra rows.
    pub async fn read_one(&self, statement: Statement) -> Result<Option<Row>> {
        let statement = self.context.apply_settings(statement);
        let mut page = self.context.perform_async(statement.clone()).await?;
        while page.row_count() < 2 {
            let Some(paging_state) = page.paging_state().cloned() else {
                break;
            };
            let next = self.context.fetch_page(&statement, &paging_state).await?;
            page.absorb(next);
        }
        expect_single_row(&statement, page)
    }

    /// Executes a write and checks its declared condition.
    pub async fn mutate(&self, statement: Statement) -> Result<MutationResult> {
        let condition = statement.condition().clone();
        let page = self.execute(statement).await?;
        mutation::evaluate(&condition, page)
    }

    /// Writes `entity`. `build` turns the encoded columns into the statement.
    pub async fn insert_entity<C, F>(
        &self,
        codec: &C,
        entity: &C::Entity,
        build: F,
    ) -> Result<MutationResult>
    where
        C: EntityCodec,
        F: FnOnce(Vec<(String, Value)>) -> Statement,
    {
        self.mutate(build(codec.encode(entity))).await
    }

    /// Reads one entity by primary key.
    pub async fn read_entity<C: EntityCodec>(
        &self,
        codec: &C,
        statement: Statement,
    ) -> Result<Option<C::Entity>> {
        self.read_one(statement)
            .await?
            .map(|row| codec.decode(&row))
            .transpose()
    }
}
