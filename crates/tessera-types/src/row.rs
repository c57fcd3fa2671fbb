//! Result rows and their column metadata.

use std::sync::Arc;

use crate::value::{DataType, Value};

/// Name of the column the store adds to conditional-write results.
pub const APPLIED_COLUMN: &str = "[applied]";

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// One row of a result page.
///
/// All rows of a page share the same column list, so it is reference counted
/// rather than copied per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[ColumnSpec]>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row.
    ///
    /// # Panics
    ///
    /// Panics if the value count differs from the column count.
    pub fn new(columns: Arc<[ColumnSpec]>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "row width must match column count"
        );
        Self { columns, values }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the value of the column called `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        self.values.get(index)
    }

    /// Returns the `[applied]` flag if the store included one.
    pub fn applied(&self) -> Option<bool> {
        self.get_by_name(APPLIED_COLUMN).and_then(Value::as_bool)
    }

    /// Iterates `(column name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .zip(self.values.iter())
    }
}
