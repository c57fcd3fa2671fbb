//! In-memory network client.
//!
//! Stands in for a real cluster in tests and demos. Tables live in ordered
//! maps keyed by encoded primary key, so scans come back in key order. Every
//! callback is invoked from a task spawned on the worker pool, never on the
//! calling thread, optionally after an artificial latency.
//!
//! Statements are recognised by their leading keyword and bind values are
//! positional:
//!
//! | Statement | Bind values |
//! |-----------|-------------|
//! | `INSERT INTO <table> ...` | every column, in table order |
//! | `UPDATE <table> ...` | every column, in table order |
//! | `DELETE FROM <table> ...` | primary key columns |
//! | `SELECT ... FROM <table> ...` | primary key columns, or none to scan |
//!
//! Write conditions are taken from [`Statement::condition`] and answered with
//! an `[applied]` row, as a real coordinator does.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tessera_types::key_encoder::encode_key;
use tessera_types::{APPLIED_COLUMN, ColumnSpec, DataType, PagingState, PreparedId, Row, Value};
use uuid::Uuid;

use crate::network::{Callback, NetworkClient, NetworkError};
use crate::page::{ExecutionInfo, ResultPage};
use crate::pool::WorkerPool;
use crate::schema::{SchemaKey, TableMetadata, UserType};
use crate::statement::{Condition, PreparedStatement, Statement};

/// Page size used when a statement sets none.
pub const DEFAULT_PAGE_SIZE: u32 = 5000;

/// Paged scans kept open at once. Opening another evicts the oldest, whose
/// paging state then fails like an expired one.
pub const MAX_OPEN_SCANS: usize = 256;

/// Error code for requests the store rejects as invalid.
pub const INVALID_REQUEST: u16 = 0x2200;

/// Error code for a malformed or unknown paging state.
pub const PROTOCOL_ERROR: u16 = 0x000A;

/// Round trips served so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub prepares: u64,
    pub executes: u64,
    pub page_fetches: u64,
    pub schema_loads: u64,
}

impl MemoryStats {
    /// Round trips that returned result pages.
    pub fn page_round_trips(&self) -> u64 {
        self.executes + self.page_fetches
    }
}

/// The demo `users` table: `id bigint PRIMARY KEY, name text`.
pub fn users_table() -> TableMetadata {
    TableMetadata {
        key: SchemaKey::new("app", "users"),
        columns: vec![
            ColumnSpec::new("id", DataType::BigInt),
            ColumnSpec::new("name", DataType::Text),
        ],
        partition_key: vec!["id".into()],
        clustering_key: Vec::new(),
    }
}

struct MemoryTable {
    columns: Arc<[ColumnSpec]>,
    key_positions: Vec<usize>,
    rows: BTreeMap<Bytes, Vec<Value>>,
}

impl MemoryTable {
    fn new(metadata: &TableMetadata) -> Result<Self, NetworkError> {
        let key_positions = metadata
            .primary_key()
            .map(|name| {
                metadata
                    .columns
                    .iter()
                    .position(|c| c.name == name)
                    .ok_or_else(|| invalid(format!("key column {name} is not a column")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            columns: Arc::from(metadata.columns.clone()),
            key_positions,
            rows: BTreeMap::new(),
        })
    }

    fn key_of(&self, values: &[Value]) -> Result<Bytes, NetworkError> {
        let key: Vec<Value> = self
            .key_positions
            .iter()
            .map(|&i| values[i].clone())
            .collect();
        encode_key(&key).map_err(|e| invalid(e.to_string()))
    }

    fn check_width(&self, values: &[Value]) -> Result<(), NetworkError> {
        if values.len() == self.columns.len() {
            Ok(())
        } else {
            Err(invalid(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )))
        }
    }

    fn row(&self, values: &[Value]) -> Row {
        Row::new(Arc::clone(&self.columns), values.to_vec())
    }

    fn holds(&self, condition: &Condition, existing: Option<&Vec<Value>>) -> bool {
        match condition {
            Condition::None => true,
            Condition::IfNotExists => existing.is_none(),
            Condition::IfExists => existing.is_some(),
            Condition::Predicate(expected) => existing.is_some_and(|row| {
                expected.iter().all(|(name, value)| {
                    self.columns
                        .iter()
                        .position(|c| &c.name == name)
                        .is_some_and(|i| row[i] == *value)
                })
            }),
        }
    }

    /// Result page of a conditional write.
    fn applied_page(&self, applied: bool, current: Option<&Vec<Value>>) -> ResultPage {
        let applied_spec = ColumnSpec::new(APPLIED_COLUMN, DataType::Boolean);
        let (columns, values) = match current.filter(|_| !applied) {
            Some(current) => {
                let mut columns = vec![applied_spec];
                columns.extend(self.columns.iter().cloned());
                let mut values = vec![Value::Boolean(false)];
                values.extend(current.iter().cloned());
                (columns, values)
            }
            None => (vec![applied_spec], vec![Value::Boolean(applied)]),
        };
        let columns: Arc<[ColumnSpec]> = Arc::from(columns);
        let row = Row::new(Arc::clone(&columns), values);
        ResultPage::new(columns, vec![row], None, ExecutionInfo::default())
    }
}

/// Rows of a scan that spans several pages.
struct Snapshot {
    columns: Arc<[ColumnSpec]>,
    rows: Vec<Row>,
    page_size: usize,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    schemas: HashMap<SchemaKey, TableMetadata>,
    user_types: HashMap<SchemaKey, UserType>,
    snapshots: BTreeMap<u64, Snapshot>,
    next_snapshot: u64,
    next_prepared: u64,
    executed: Vec<Statement>,
    latency: Duration,
    fail_next_fetch: Option<NetworkError>,
    duplicate_reads: bool,
}

#[derive(Default)]
struct Counters {
    prepares: AtomicU64,
    executes: AtomicU64,
    page_fetches: AtomicU64,
    schema_loads: AtomicU64,
}

/// Network client backed by in-process tables.
pub struct MemoryClient {
    pool: WorkerPool,
    state: Mutex<State>,
    counters: Counters,
}

impl MemoryClient {
    /// Creates an empty store whose callbacks run on `pool`.
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            pool: pool.clone(),
            state: Mutex::new(State::default()),
            counters: Counters::default(),
        }
    }

    /// Delays every callback by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Makes the next `fetch_page` fail with `error`.
    pub fn fail_next_fetch(&self, error: NetworkError) {
        self.lock().fail_next_fetch = Some(error);
    }

    /// Makes key lookups return their row twice.
    pub fn inject_duplicate_reads(&self, enabled: bool) {
        self.lock().duplicate_reads = enabled;
    }

    /// Creates a table and publishes its metadata in the schema catalog.
    pub fn create_table(&self, metadata: TableMetadata) -> Result<(), NetworkError> {
        let table = MemoryTable::new(&metadata)?;
        let mut state = self.lock();
        state.tables.insert(metadata.key.name.clone(), table);
        state.schemas.insert(metadata.key.clone(), metadata);
        Ok(())
    }

    /// Publishes a user type in the schema catalog.
    pub fn register_user_type(&self, user_type: UserType) {
        self.lock()
            .user_types
            .insert(user_type.key.clone(), user_type);
    }

    /// Writes a row directly, bypassing statements and counters.
    pub fn insert_row(&self, table: &str, values: Vec<Value>) -> Result<(), NetworkError> {
        let mut state = self.lock();
        let table = state
            .tables
            .get_mut(table)
            .ok_or_else(|| invalid(format!("unconfigured table {table}")))?;
        table.check_width(&values)?;
        let key = table.key_of(&values)?;
        table.rows.insert(key, values);
        Ok(())
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            prepares: self.counters.prepares.load(Ordering::Acquire),
            executes: self.counters.executes.load(Ordering::Acquire),
            page_fetches: self.counters.page_fetches.load(Ordering::Acquire),
            schema_loads: self.counters.schema_loads.load(Ordering::Acquire),
        }
    }

    /// Statements received by `execute`, in arrival order.
    pub fn executed(&self) -> Vec<Statement> {
        self.lock().executed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond<T: Send + 'static>(&self, result: Result<T, NetworkError>, callback: Callback<T>) {
        let latency = self.lock().latency;
        drop(self.pool.spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            callback(result);
        }));
    }

    fn run(state: &mut State, statement: &Statement) -> Result<ResultPage, NetworkError> {
        let query = statement.query_text();
        let (verb, table_name) = parse(query)
            .ok_or_else(|| invalid(format!("unsupported statement: {query}")))?;

        let duplicate_reads = state.duplicate_reads;
        let table = state
            .tables
            .get_mut(table_name)
            .ok_or_else(|| invalid(format!("unconfigured table {table_name}")))?;
        let values = statement.values();
        let condition = statement.condition();

        match verb {
            Verb::Insert | Verb::Update => {
                table.check_width(values)?;
                let key = table.key_of(values)?;
                let existing = table.rows.get(&key);
                if !table.holds(condition, existing) {
                    return Ok(table.applied_page(false, existing));
                }
                table.rows.insert(key, values.to_vec());
                Ok(written(table, condition))
            }
            Verb::Delete => {
                let key = lookup_key(values, table.key_positions.len())?;
                let existing = table.rows.get(&key);
                if !table.holds(condition, existing) {
                    return Ok(table.applied_page(false, existing));
                }
                table.rows.remove(&key);
                Ok(written(table, condition))
            }
            Verb::Select => {
                let mut rows: Vec<Row> = if values.is_empty() {
                    table.rows.values().map(|v| table.row(v)).collect()
                } else {
                    let key = lookup_key(values, table.key_positions.len())?;
                    table.rows.get(&key).map(|v| table.row(v)).into_iter().collect()
                };
                if duplicate_reads && !values.is_empty() {
                    rows.extend(rows.clone());
                }

                let columns = Arc::clone(&table.columns);
                let info = execution_info(statement);
                let page_size = statement.page_size().unwrap_or(DEFAULT_PAGE_SIZE).max(1);
                let page_size = usize::try_from(page_size).unwrap_or(usize::MAX);
                if rows.len() <= page_size {
                    return Ok(ResultPage::new(columns, rows, None, info));
                }

                let id = state.next_snapshot;
                state.next_snapshot += 1;
                let first: Vec<Row> = rows[..page_size].to_vec();
                state.snapshots.insert(
                    id,
                    Snapshot {
                        columns: Arc::clone(&columns),
                        rows,
                        page_size,
                    },
                );
                while state.snapshots.len() > MAX_OPEN_SCANS {
                    if let Some((evicted, _)) = state.snapshots.pop_first() {
                        tracing::debug!(scan = evicted, "evicted abandoned scan");
                    }
                }
                Ok(ResultPage::new(
                    columns,
                    first,
                    Some(encode_paging(id, page_size)),
                    info,
                ))
            }
        }
    }

    fn next_page(
        state: &mut State,
        statement: &Statement,
        paging_state: &PagingState,
    ) -> Result<ResultPage, NetworkError> {
        if let Some(error) = state.fail_next_fetch.take() {
            return Err(error);
        }

        let (id, offset) = decode_paging(paging_state)?;
        let snapshot = state.snapshots.get(&id).ok_or_else(|| NetworkError::Server {
            code: PROTOCOL_ERROR,
            message: "unknown paging state".to_string(),
        })?;

        let end = (offset + snapshot.page_size).min(snapshot.rows.len());
        let rows = snapshot.rows.get(offset..end).unwrap_or_default().to_vec();
        let columns = Arc::clone(&snapshot.columns);
        let more = end < snapshot.rows.len();
        if !more {
            state.snapshots.remove(&id);
        }

        Ok(ResultPage::new(
            columns,
            rows,
            more.then(|| encode_paging(id, end)),
            execution_info(statement),
        ))
    }
}

impl NetworkClient for MemoryClient {
    fn prepare(&self, query: &str, callback: Callback<PreparedStatement>) {
        self.counters.prepares.fetch_add(1, Ordering::AcqRel);
        let result = if parse(query).is_some() {
            let mut state = self.lock();
            let id = state.next_prepared;
            state.next_prepared += 1;
            Ok(PreparedStatement::new(
                PreparedId::new(id.to_be_bytes().to_vec()),
                query,
                Vec::new(),
            ))
        } else {
            Err(invalid(format!("unsupported statement: {query}")))
        };
        self.respond(result, callback);
    }

    fn execute(&self, statement: &Statement, callback: Callback<ResultPage>) {
        self.counters.executes.fetch_add(1, Ordering::AcqRel);
        let result = {
            let mut state = self.lock();
            state.executed.push(statement.clone());
            Self::run(&mut state, statement)
        };
        self.respond(result, callback);
    }

    fn fetch_page(
        &self,
        statement: &Statement,
        paging_state: &PagingState,
        callback: Callback<ResultPage>,
    ) {
        self.counters.page_fetches.fetch_add(1, Ordering::AcqRel);
        let result = Self::next_page(&mut self.lock(), statement, paging_state);
        self.respond(result, callback);
    }

    fn column_metadata(&self, key: &SchemaKey, callback: Callback<TableMetadata>) {
        self.counters.schema_loads.fetch_add(1, Ordering::AcqRel);
        let result = self
            .lock()
            .schemas
            .get(key)
            .cloned()
            .ok_or_else(|| invalid(format!("unconfigured table {key}")));
        self.respond(result, callback);
    }

    fn user_type(&self, key: &SchemaKey, callback: Callback<UserType>) {
        self.counters.schema_loads.fetch_add(1, Ordering::AcqRel);
        let result = self
            .lock()
            .user_types
            .get(key)
            .cloned()
            .ok_or_else(|| invalid(format!("unknown type {key}")));
        self.respond(result, callback);
    }
}

impl fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClient")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Insert,
    Update,
    Delete,
    Select,
}

/// Finds the statement verb and the unqualified table name.
fn parse(query: &str) -> Option<(Verb, &str)> {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    let after = |keyword: &str| {
        tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case(keyword))
            .and_then(|i| tokens.get(i + 1))
            .copied()
    };

    let first = tokens.first()?;
    let (verb, raw) = if first.eq_ignore_ascii_case("INSERT") {
        (Verb::Insert, after("INTO")?)
    } else if first.eq_ignore_ascii_case("UPDATE") {
        (Verb::Update, *tokens.get(1)?)
    } else if first.eq_ignore_ascii_case("DELETE") {
        (Verb::Delete, after("FROM")?)
    } else if first.eq_ignore_ascii_case("SELECT") {
        (Verb::Select, after("FROM")?)
    } else {
        return None;
    };

    let name = raw.split(['(', ';']).next()?;
    let name = name.rsplit('.').next()?;
    (!name.is_empty()).then_some((verb, name))
}

fn lookup_key(values: &[Value], key_len: usize) -> Result<Bytes, NetworkError> {
    if values.len() != key_len {
        return Err(invalid(format!(
            "expected {key_len} key values, got {}",
            values.len()
        )));
    }
    encode_key(values).map_err(|e| invalid(e.to_string()))
}

fn written(table: &MemoryTable, condition: &Condition) -> ResultPage {
    if condition.is_declared() {
        table.applied_page(true, None)
    } else {
        ResultPage::empty()
    }
}

fn execution_info(statement: &Statement) -> ExecutionInfo {
    ExecutionInfo {
        tracing_id: (statement.tracing() == Some(true)).then(Uuid::new_v4),
        warnings: Vec::new(),
    }
}

fn encode_paging(id: u64, offset: usize) -> PagingState {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u64(id);
    buf.put_u64(offset as u64);
    PagingState::new(buf.freeze())
}

fn decode_paging(paging_state: &PagingState) -> Result<(u64, usize), NetworkError> {
    let mut bytes = paging_state.as_bytes().clone();
    if bytes.len() != 16 {
        return Err(NetworkError::Server {
            code: PROTOCOL_ERROR,
            message: "malformed paging state".to_string(),
        });
    }
    let id = bytes.get_u64();
    let offset = usize::try_from(bytes.get_u64()).map_err(|_| NetworkError::Server {
        code: PROTOCOL_ERROR,
        message: "paging offset out of range".to_string(),
    })?;
    Ok((id, offset))
}

fn invalid(message: String) -> NetworkError {
    NetworkError::Server {
        code: INVALID_REQUEST,
        message,
    }
}
