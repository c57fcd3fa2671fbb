//! Boundary to the underlying network client.
//!
//! The network client owns topology discovery, connection pooling, wire
//! framing and retries. This layer only calls the primitives below and
//! receives their results through completion callbacks, which may run on any
//! thread the client chooses.

use std::time::Duration;

use tessera_types::PagingState;
use thiserror::Error;

use crate::page::ResultPage;
use crate::schema::{SchemaKey, TableMetadata, UserType};
use crate::statement::{PreparedStatement, Statement};

/// Completion callback handed to the network client. Invoked exactly once.
pub type Callback<T> = Box<dyn FnOnce(Result<T, NetworkError>) + Send + 'static>;

/// Failures reported by the network client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// No connection could be used for the request.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The coordinator answered with an error frame.
    #[error("server error {code:#06x}: {message}")]
    Server { code: u16, message: String },

    /// The completion was dropped without being invoked.
    #[error("completion dropped before it fired")]
    Dropped,

    /// An outer layer wrapped the real failure.
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<NetworkError>,
    },
}

impl NetworkError {
    /// Wraps this error with additional context.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Self::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strips every `Wrapped` layer and returns the innermost failure.
    pub fn into_root_cause(self) -> Self {
        let mut current = self;
        while let Self::Wrapped { source, .. } = current {
            current = *source;
        }
        current
    }
}

/// Asynchronous I/O primitives supplied by the network client.
pub trait NetworkClient: Send + Sync + 'static {
    /// Prepares `query` on the server.
    fn prepare(&self, query: &str, callback: Callback<PreparedStatement>);

    /// Executes a statement and returns its first page.
    fn execute(&self, statement: &Statement, callback: Callback<ResultPage>);

    /// Fetches the page following `paging_state` for `statement`.
    fn fetch_page(
        &self,
        statement: &Statement,
        paging_state: &PagingState,
        callback: Callback<ResultPage>,
    );

    /// Loads a table descriptor from the schema catalog.
    fn column_metadata(&self, key: &SchemaKey, callback: Callback<TableMetadata>);

    /// Loads a user-defined type descriptor from the schema catalog.
    fn user_type(&self, key: &SchemaKey, callback: Callback<UserType>);
}
