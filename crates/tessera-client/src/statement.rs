//! Statements as handed over by the statement builder.
//!
//! The query text and bind values are opaque to this layer. A statement also
//! carries the per-query settings the execution context fills in before
//! dispatch, the write condition it declares (if any), and the key a
//! single-row read expects to see echoed back.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tessera_types::key_encoder::{self, KeyEncodingError};
use tessera_types::{
    ColumnSpec, Consistency, PreparedId, RetryPolicy, SerialConsistency, Value, WriteTimestamp,
};

/// A statement prepared on the server.
///
/// Cheap to clone; the cache hands out copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    id: PreparedId,
    query: Arc<str>,
    variables: Arc<[ColumnSpec]>,
}

impl PreparedStatement {
    pub fn new(id: PreparedId, query: impl Into<Arc<str>>, variables: Vec<ColumnSpec>) -> Self {
        Self {
            id,
            query: query.into(),
            variables: Arc::from(variables),
        }
    }

    pub fn id(&self) -> &PreparedId {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Bind markers, in order.
    pub fn variables(&self) -> &[ColumnSpec] {
        &self.variables
    }

    /// Creates a statement executing this prepared handle with `values`.
    pub fn bind(&self, values: Vec<Value>) -> Statement {
        Statement::from_body(StatementBody::Prepared(self.clone()), values)
    }
}

/// What the network client is asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementBody {
    /// Unprepared query text.
    Simple(Arc<str>),
    /// A server-side prepared statement.
    Prepared(PreparedStatement),
}

/// Condition a write declares. The store evaluates it; the client only reads
/// back the `[applied]` flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Condition {
    /// Unconditional write.
    #[default]
    None,
    /// `IF NOT EXISTS`: insert-style existence check.
    IfNotExists,
    /// `IF EXISTS`: update/delete-style existence check.
    IfExists,
    /// `IF col = value AND ...`: equality predicates on the current row.
    Predicate(Vec<(String, Value)>),
}

impl Condition {
    pub fn is_declared(&self) -> bool {
        !matches!(self, Condition::None)
    }
}

/// Key a single-row read expects the store to echo back.
///
/// The comparison is on encoded bytes, so it assumes both sides serialize
/// key values the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEcho {
    columns: Vec<String>,
    expected: Bytes,
}

impl KeyEcho {
    /// Builds the expectation from key column names and their bound values.
    pub fn new(columns: Vec<String>, values: &[Value]) -> Result<Self, KeyEncodingError> {
        Ok(Self {
            columns,
            expected: key_encoder::encode_key(values)?,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn expected(&self) -> &Bytes {
        &self.expected
    }
}

/// A statement ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    body: StatementBody,
    values: Vec<Value>,
    pub(crate) consistency: Option<Consistency>,
    pub(crate) serial_consistency: Option<SerialConsistency>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) writetime: Option<WriteTimestamp>,
    pub(crate) tracing: Option<bool>,
    pub(crate) retry_policy: Option<RetryPolicy>,
    pub(crate) page_size: Option<u32>,
    condition: Condition,
    key_echo: Option<KeyEcho>,
}

impl Statement {
    /// Creates an unprepared statement with no bind values.
    pub fn new(query: impl Into<Arc<str>>) -> Self {
        Self::from_body(StatementBody::Simple(query.into()), Vec::new())
    }

    fn from_body(body: StatementBody, values: Vec<Value>) -> Self {
        Self {
            body,
            values,
            consistency: None,
            serial_consistency: None,
            ttl: None,
            writetime: None,
            tracing: None,
            retry_policy: None,
            page_size: None,
            condition: Condition::None,
            key_echo: None,
        }
    }

    /// Replaces the bind values.
    pub fn bind(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn with_serial_consistency(mut self, serial: SerialConsistency) -> Self {
        self.serial_consistency = Some(serial);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_writetime(mut self, writetime: WriteTimestamp) -> Self {
        self.writetime = Some(writetime);
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing = Some(enabled);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Declares the condition this write carries.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Declares the key a single-row read expects back.
    pub fn expect_key(mut self, echo: KeyEcho) -> Self {
        self.key_echo = Some(echo);
        self
    }

    pub fn body(&self) -> &StatementBody {
        &self.body
    }

    /// Query text, whether prepared or not.
    pub fn query_text(&self) -> &str {
        match &self.body {
            StatementBody::Simple(text) => text.as_ref(),
            StatementBody::Prepared(prepared) => prepared.query(),
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    pub fn serial_consistency(&self) -> Option<SerialConsistency> {
        self.serial_consistency
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn writetime(&self) -> Option<WriteTimestamp> {
        self.writetime
    }

    /// Tracing flag; `None` defers to the network client.
    pub fn tracing(&self) -> Option<bool> {
        self.tracing
    }

    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy
    }

    pub fn page_size(&self) -> Option<u32> {
        self.page_size
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn key_echo(&self) -> Option<&KeyEcho> {
        self.key_echo.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::DataType;

    #[test]
    fn prepared_bind_keeps_query_text() {
        let prepared = PreparedStatement::new(
            PreparedId::new(vec![1, 2]),
            "SELECT * FROM users WHERE id = ?",
            vec![ColumnSpec::new("id", DataType::BigInt)],
        );
        let statement = prepared.bind(vec![Value::BigInt(1)]);

        assert_eq!(statement.query_text(), "SELECT * FROM users WHERE id = ?");
        assert_eq!(statement.values(), &[Value::BigInt(1)]);
        assert!(matches!(statement.body(), StatementBody::Prepared(_)));
    }

    #[test]
    fn settings_start_unset() {
        let statement = Statement::new("SELECT 1");
        assert_eq!(statement.consistency(), None);
        assert_eq!(statement.tracing(), None);
        assert_eq!(statement.condition(), &Condition::None);
        assert!(statement.key_echo().is_none());
    }

    #[test]
    fn key_echo_encodes_values() {
        let echo = KeyEcho::new(vec!["id".into()], &[Value::BigInt(0)]).unwrap();
        assert_eq!(echo.columns(), &["id".to_string()]);
        assert_eq!(echo.expected().as_ref(), &[0, 8, 0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert!(KeyEcho::new(vec!["id".into()], &[Value::Null]).is_err());
    }

    #[test]
    fn condition_declared() {
        assert!(!Condition::None.is_declared());
        assert!(Condition::IfNotExists.is_declared());
        assert!(Condition::Predicate(vec![("name".into(), "a".into())]).is_declared());
    }
}
