//! Execution context: per-query settings plus shared resources.
//!
//! A context is an immutable value. Every `with_*` call returns a new context
//! that shares the network client, worker pool and caches with the original,
//! so deriving a context per query costs one `Arc` clone.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tessera_config::{CacheConfig, TesseraConfig};
use tessera_types::{Consistency, PagingState, RetryPolicy, SerialConsistency, WriteTimestamp};

use crate::cache::LoadingCache;
use crate::error::Result;
use crate::future::{ResultFuture, dispatch};
use crate::network::NetworkClient;
use crate::page::ResultPage;
use crate::pool::WorkerPool;
use crate::schema::{SchemaKey, TableMetadata, UserType};
use crate::statement::{PreparedStatement, Statement};

/// Default bound for blocking calls.
pub const DEFAULT_BLOCKING_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded caches shared by every context derived from one root.
#[derive(Debug)]
pub struct Caches {
    prepared: LoadingCache<Arc<str>, PreparedStatement>,
    tables: LoadingCache<SchemaKey, Arc<TableMetadata>>,
    user_types: LoadingCache<SchemaKey, Arc<UserType>>,
}

impl Caches {
    /// # Panics
    ///
    /// Panics if any capacity is 0.
    pub fn new(prepared: usize, column_metadata: usize, user_types: usize) -> Self {
        Self {
            prepared: LoadingCache::new("prepared", prepared),
            tables: LoadingCache::new("column_metadata", column_metadata),
            user_types: LoadingCache::new("user_types", user_types),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.prepared_statements,
            config.column_metadata,
            config.user_types,
        )
    }

    pub fn prepared(&self) -> &LoadingCache<Arc<str>, PreparedStatement> {
        &self.prepared
    }

    pub fn tables(&self) -> &LoadingCache<SchemaKey, Arc<TableMetadata>> {
        &self.tables
    }

    pub fn user_types(&self) -> &LoadingCache<SchemaKey, Arc<UserType>> {
        &self.user_types
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Settings applied to statements that leave them unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Settings {
    consistency: Option<Consistency>,
    serial_consistency: Option<SerialConsistency>,
    ttl: Option<Duration>,
    writetime: Option<WriteTimestamp>,
    tracing: Option<bool>,
    retry_policy: Option<RetryPolicy>,
    page_size: Option<u32>,
}

struct Shared {
    client: Arc<dyn NetworkClient>,
    pool: WorkerPool,
    caches: Arc<Caches>,
}

/// Immutable per-query configuration with handles to shared resources.
#[derive(Clone)]
pub struct ExecutionContext {
    settings: Settings,
    blocking_timeout: Duration,
    shared: Arc<Shared>,
}

impl ExecutionContext {
    /// Creates a root context with default caches and no settings.
    pub fn new(client: Arc<dyn NetworkClient>, pool: WorkerPool) -> Self {
        Self::with_caches(client, pool, Arc::new(Caches::default()))
    }

    /// Creates a root context over caches shared with other roots.
    pub fn with_caches(
        client: Arc<dyn NetworkClient>,
        pool: WorkerPool,
        caches: Arc<Caches>,
    ) -> Self {
        Self {
            settings: Settings::default(),
            blocking_timeout: DEFAULT_BLOCKING_TIMEOUT,
            shared: Arc::new(Shared {
                client,
                pool,
                caches,
            }),
        }
    }

    /// Creates a root context from loaded configuration.
    pub fn from_config(
        client: Arc<dyn NetworkClient>,
        pool: WorkerPool,
        config: &TesseraConfig,
    ) -> Self {
        let defaults = &config.defaults;
        let caches = Arc::new(Caches::from_config(&config.caches));
        let mut context = Self::with_caches(client, pool, caches);
        context.settings = Settings {
            consistency: defaults.consistency,
            serial_consistency: defaults.serial_consistency,
            tracing: defaults.tracing,
            retry_policy: defaults.retry_policy,
            page_size: defaults.page_size,
            ..Settings::default()
        };
        context.blocking_timeout = config.client.blocking_timeout();
        context
    }

    // ------------------------------------------------------------------------
    // Functional setters
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn with_consistency(&self, consistency: Consistency) -> Self {
        self.derive(|s| s.consistency = Some(consistency))
    }

    #[must_use]
    pub fn with_serial_consistency(&self, serial: SerialConsistency) -> Self {
        self.derive(|s| s.serial_consistency = Some(serial))
    }

    #[must_use]
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        self.derive(|s| s.ttl = Some(ttl))
    }

    #[must_use]
    pub fn with_writetime(&self, writetime: WriteTimestamp) -> Self {
        self.derive(|s| s.writetime = Some(writetime))
    }

    #[must_use]
    pub fn with_tracing(&self, enabled: bool) -> Self {
        self.derive(|s| s.tracing = Some(enabled))
    }

    #[must_use]
    pub fn with_retry_policy(&self, policy: RetryPolicy) -> Self {
        self.derive(|s| s.retry_policy = Some(policy))
    }

    #[must_use]
    pub fn with_page_size(&self, page_size: u32) -> Self {
        self.derive(|s| s.page_size = Some(page_size))
    }

    #[must_use]
    pub fn with_blocking_timeout(&self, timeout: Duration) -> Self {
        let mut next = self.clone();
        next.blocking_timeout = timeout;
        next
    }

    fn derive(&self, update: impl FnOnce(&mut Settings)) -> Self {
        let mut next = self.clone();
        update(&mut next.settings);
        next
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn consistency(&self) -> Option<Consistency> {
        self.settings.consistency
    }

    pub fn serial_consistency(&self) -> Option<SerialConsistency> {
        self.settings.serial_consistency
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.settings.ttl
    }

    pub fn writetime(&self) -> Option<WriteTimestamp> {
        self.settings.writetime
    }

    pub fn tracing(&self) -> Option<bool> {
        self.settings.tracing
    }

    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.settings.retry_policy
    }

    pub fn page_size(&self) -> Option<u32> {
        self.settings.page_size
    }

    pub fn blocking_timeout(&self) -> Duration {
        self.blocking_timeout
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    pub fn caches(&self) -> &Arc<Caches> {
        &self.shared.caches
    }

    pub fn client(&self) -> &Arc<dyn NetworkClient> {
        &self.shared.client
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Fills every setting `statement` leaves unset from this context.
    pub fn apply_settings(&self, mut statement: Statement) -> Statement {
        let s = &self.settings;
        statement.consistency = statement.consistency.or(s.consistency);
        statement.serial_consistency = statement.serial_consistency.or(s.serial_consistency);
        statement.ttl = statement.ttl.or(s.ttl);
        statement.writetime = statement.writetime.or(s.writetime);
        statement.tracing = statement.tracing.or(s.tracing);
        statement.retry_policy = statement.retry_policy.or(s.retry_policy);
        statement.page_size = statement.page_size.or(s.page_size);
        statement
    }

    /// Applies this context's settings and dispatches `statement`.
    pub fn perform_async(&self, statement: Statement) -> ResultFuture<ResultPage> {
        let statement = self.apply_settings(statement);
        tracing::debug!(
            query = statement.query_text(),
            values = statement.values().len(),
            consistency = ?statement.consistency(),
            page_size = ?statement.page_size(),
            "dispatching statement"
        );

        let client = &self.shared.client;
        dispatch(&self.shared.pool, |callback| client.execute(&statement, callback))
    }

    /// Requests the page after `paging_state`.
    pub fn fetch_page(
        &self,
        statement: &Statement,
        paging_state: &PagingState,
    ) -> ResultFuture<ResultPage> {
        tracing::debug!(query = statement.query_text(), "fetching next page");
        let client = &self.shared.client;
        dispatch(&self.shared.pool, |callback| {
            client.fetch_page(statement, paging_state, callback);
        })
    }

    /// Returns the prepared handle for `query`, preparing it on first use.
    pub async fn prepare(&self, query: &str) -> Result<PreparedStatement> {
        let client = &self.shared.client;
        let pool = &self.shared.pool;
        self.shared
            .caches
            .prepared
            .get_or_load(Arc::from(query), || {
                tracing::debug!(query, "preparing statement");
                dispatch(pool, |callback| client.prepare(query, callback))
            })
            .await
    }

    /// Returns the column layout of `keyspace.table`, loading it on first use.
    pub async fn column_metadata(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<Arc<TableMetadata>> {
        let key = SchemaKey::new(keyspace, table);
        let client = &self.shared.client;
        let pool = &self.shared.pool;
        self.shared
            .caches
            .tables
            .get_or_load(key.clone(), || {
                let load = dispatch(pool, |callback| client.column_metadata(&key, callback));
                async move { load.await.map(Arc::new) }
            })
            .await
    }

    /// Returns the field layout of user type `keyspace.name`, loading it on
    /// first use.
    pub async fn user_type(&self, keyspace: &str, name: &str) -> Result<Arc<UserType>> {
        let key = SchemaKey::new(keyspace, name);
        let client = &self.shared.client;
        let pool = &self.shared.pool;
        self.shared
            .caches
            .user_types
            .get_or_load(key.clone(), || {
                let load = dispatch(pool, |callback| client.user_type(&key, callback));
                async move { load.await.map(Arc::new) }
            })
            .await
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("settings", &self.settings)
            .field("blocking_timeout", &self.blocking_timeout)
            .finish_non_exhaustive()
    }
}
