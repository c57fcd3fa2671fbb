//! Explicit mapping between application types and rows.
//!
//! Each entity type gets its own [`EntityCodec`]; there is no reflection. The
//! query layer only calls through the trait and never inspects entities.

use tessera_types::{Row, Value};

use crate::error::{QueryError, Result};

/// Converts one entity type to and from column values.
pub trait EntityCodec: Send + Sync {
    type Entity;

    /// Column name/value pairs to write for `entity`.
    fn encode(&self, entity: &Self::Entity) -> Vec<(String, Value)>;

    /// Reads an entity back from a result row.
    fn decode(&self, row: &Row) -> Result<Self::Entity>;
}

/// Returns the non-null value of `column`.
pub fn required<'a>(row: &'a Row, column: &str) -> Result<&'a Value> {
    match row.get_by_name(column) {
        None => Err(QueryError::codec(format!("missing column `{column}`"))),
        Some(Value::Null) => Err(QueryError::codec(format!("column `{column}` is null"))),
        Some(value) => Ok(value),
    }
}

/// Returns `column` as an integer.
pub fn required_i64(row: &Row, column: &str) -> Result<i64> {
    let value = required(row, column)?;
    value
        .as_i64()
        .ok_or_else(|| mismatch(column, value, "an integer"))
}

/// Returns `column` as text.
pub fn required_text<'a>(row: &'a Row, column: &str) -> Result<&'a str> {
    let value = required(row, column)?;
    value.as_text().ok_or_else(|| mismatch(column, value, "text"))
}

fn mismatch(column: &str, value: &Value, expected: &str) -> QueryError {
    let actual = value
        .data_type()
        .map_or_else(|| "null".to_string(), |data_type| data_type.to_string());
    QueryError::codec(format!(
        "column `{column}` has type {actual}, expected {expected}"
    ))
}

/// Orders encoded pairs by `columns`, as positional bind values.
///
/// Columns the codec did not produce are bound as null.
pub fn bind_values(encoded: &[(String, Value)], columns: &[&str]) -> Vec<Value> {
    columns
        .iter()
        .map(|column| {
            encoded
                .iter()
                .find(|(name, _)| name.as_str() == *column)
                .map_or(Value::Null, |(_, value)| value.clone())
        })
        .collect()
}
