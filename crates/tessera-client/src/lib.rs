//! # tessera-client: Query layer for `Tessera`
//!
//! This crate sits between application code and an asynchronous network
//! client for a partitioned, column-oriented store. It provides:
//!
//! - Per-query settings through immutable [`ExecutionContext`] values
//! - Bounded, shared caches for prepared statements and schema metadata
//! - A bridge from callback completion to awaitable [`ResultFuture`]s
//! - Paged results with at most one page request in flight
//!   ([`PagedResultCursor`])
//! - Demand-driven delivery of rows to a [`Subscriber`] ([`RowStream`])
//! - Interpretation of conditional writes ([`mutation::evaluate`]) and
//!   integrity checks for single-row reads ([`expect_single_row`])
//!
//! Topology, connection pooling, wire framing and retries belong to the
//! [`NetworkClient`] implementation; this crate only calls its primitives.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessera_client::{ExecutionContext, Session, Statement, WorkerPool};
//! use tessera_types::Consistency;
//!
//! let pool = WorkerPool::new(4)?;
//! let context = ExecutionContext::new(client, pool).with_consistency(Consistency::Quorum);
//! let session = Session::new(context);
//!
//! // Stream a large result with backpressure
//! let stream = session.stream(Statement::new("SELECT * FROM events")).await?;
//! stream.subscribe(Arc::new(MySubscriber::default()));
//! ```
//!
//! ## Conditional Writes
//!
//! ```ignore
//! let insert = Statement::new("INSERT INTO users (id, name) VALUES (?, ?)")
//!     .bind(vec![1i64.into(), "a".into()])
//!     .with_condition(Condition::IfNotExists);
//!
//! match session.mutate(insert).await {
//!     Ok(_) => println!("inserted"),
//!     Err(e) if e.is_condition_not_met() => println!("already there"),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

mod cache;
pub mod codec;
mod context;
mod cursor;
mod error;
mod future;
pub mod memory;
pub mod mutation;
mod network;
mod page;
mod pool;
mod schema;
mod session;
mod single_row;
mod statement;
mod subscription;

// Re-export public types
pub use cache::LoadingCache;
pub use codec::EntityCodec;
pub use context::{Caches, DEFAULT_BLOCKING_TIMEOUT, ExecutionContext};
pub use cursor::PagedResultCursor;
pub use error::{ConditionKind, QueryError, Result};
pub use future::{Completer, ResultFuture, bridge, dispatch};
pub use mutation::MutationResult;
pub use network::{Callback, NetworkClient, NetworkError};
pub use page::{ExecutionInfo, ResultPage};
pub use pool::WorkerPool;
pub use schema::{SchemaKey, TableMetadata, UserType};
pub use session::Session;
pub use single_row::expect_single_row;
pub use statement::{Condition, KeyEcho, PreparedStatement, Statement, StatementBody};
pub use subscription::{RowStream, Subscriber, Subscription, UNBOUNDED};
