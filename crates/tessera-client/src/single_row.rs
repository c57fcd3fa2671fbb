//! Integrity checks for single-row reads.
//!
//! A read addressed by primary key returns at most one row. Two checks guard
//! against the store answering a different question than the one asked:
//!
//! 1. More than one row is a fatal [`QueryError::TooManyResults`].
//! 2. If the statement declares a [`KeyEcho`](crate::statement::KeyEcho), the
//!    row's key columns are re-encoded and compared byte for byte with the
//!    requested key; a difference is a fatal [`QueryError::ProtocolMismatch`].
//!
//! The echo comparison relies on both sides encoding key values identically.
//! A row that does not carry the key columns (a projection without them) is
//! not checked.

use tessera_types::key_encoder::encode_key;
use tessera_types::{Row, Value};

use crate::error::{QueryError, Result};
use crate::page::ResultPage;
use crate::statement::Statement;

/// Applies the single-row checks to `statement`'s result.
///
/// `page` must hold either every row of the result or at least two of them.
pub fn expect_single_row(statement: &Statement, page: ResultPage) -> Result<Option<Row>> {
    let count = page.row_count();
    if count > 1 {
        tracing::warn!(
            count,
            query = statement.query_text(),
            "single-row read returned several rows"
        );
        return Err(QueryError::TooManyResults { count });
    }

    let (rows, _, _) = page.into_parts();
    let Some(row) = rows.into_iter().next() else {
        return Ok(None);
    };

    if let Some(echo) = statement.key_echo() {
        let key: Option<Vec<Value>> = echo
            .columns()
            .iter()
            .map(|column| row.get_by_name(column).cloned())
            .collect();

        if let Some(key) = key {
            let actual = encode_key(&key)?;
            if actual != *echo.expected() {
                tracing::warn!(query = statement.query_text(), "key echo mismatch");
                return Err(QueryError::ProtocolMismatch {
                    expected: to_hex(echo.expected()),
                    actual: to_hex(&actual),
                });
            }
        }
    }

    Ok(Some(row))
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
            // Writing to a String cannot fail.
            let _ = write!(out, "{b:02x}");
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ExecutionInfo;
    use crate::statement::KeyEcho;
    use std::sync::Arc;
    use tessera_types::{ColumnSpec, DataType};

    fn page(ids: &[i64]) -> ResultPage {
        let columns: Arc<[ColumnSpec]> = Arc::from(vec![
            ColumnSpec::new("id", DataType::BigInt),
            ColumnSpec::new("name", DataType::Text),
        ]);
        let rows = ids
            .iter()
            .map(|id| Row::new(Arc::clone(&columns), vec![Value::BigInt(*id), "a".into()]))
            .collect();
        ResultPage::new(columns, rows, None, ExecutionInfo::default())
    }

    fn by_id(id: i64) -> Statement {
        Statement::new("SELECT * FROM users WHERE id = ?")
            .bind(vec![Value::BigInt(id)])
            .expect_key(KeyEcho::new(vec!["id".into()], &[Value::BigInt(id)]).unwrap())
    }

    #[test]
    fn empty_result_is_none() {
        assert_eq!(expect_single_row(&by_id(1), page(&[])).unwrap(), None);
    }

    #[test]
    fn matching_row_is_returned() {
        let row = expect_single_row(&by_id(1), page(&[1])).unwrap().unwrap();
        assert_eq!(row.get_by_name("id"), Some(&Value::BigInt(1)));
    }

    #[test]
    fn two_rows_are_fatal() {
        let err = expect_single_row(&by_id(1), page(&[1, 1])).unwrap_err();
        assert!(matches!(err, QueryError::TooManyResults { count: 2 }));
    }

    #[test]
    fn echoed_key_must_match() {
        let err = expect_single_row(&by_id(1), page(&[2])).unwrap_err();
        match err {
            QueryError::ProtocolMismatch { expected, actual } => {
                assert_eq!(expected, "00088000000000000001");
                assert_eq!(actual, "00088000000000000002");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn statement_without_echo_is_not_checked() {
        let statement =
            Statement::new("SELECT * FROM users WHERE id = ?").bind(vec![Value::BigInt(1)]);
        assert!(expect_single_row(&statement, page(&[2])).unwrap().is_some());
    }

    #[test]
    fn projection_without_key_columns_skips_echo() {
        let columns: Arc<[ColumnSpec]> = Arc::from(vec![ColumnSpec::new("name", DataType::Text)]);
        let row = Row::new(Arc::clone(&columns), vec!["a".into()]);
        let page = ResultPage::new(columns, vec![row], None, ExecutionInfo::default());

        assert!(expect_single_row(&by_id(1), page).unwrap().is_some());
    }
}
