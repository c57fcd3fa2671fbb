//! Interpretation of write results.
//!
//! The store evaluates write conditions atomically and reports the outcome in
//! the `[applied]` column of the first result row. When the condition failed,
//! that row also carries the current values of the targeted entry, if any.

use tessera_types::Row;

use crate::error::{ConditionKind, QueryError, Result};
use crate::page::{ExecutionInfo, ResultPage};
use crate::statement::Condition;

/// Outcome of an executed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult {
    applied: bool,
    current: Option<Row>,
    info: ExecutionInfo,
}

impl MutationResult {
    /// Reads the outcome from a write's result page.
    ///
    /// A page without an `[applied]` column (an unconditional write) counts
    /// as applied.
    pub fn from_page(page: ResultPage) -> Self {
        let (rows, _, info) = page.into_parts();
        let first = rows.into_iter().next();
        let applied = first.as_ref().and_then(Row::applied).unwrap_or(true);
        let current = first.filter(|row| !applied && row.len() > 1);
        Self {
            applied,
            current,
            info,
        }
    }

    /// Whether the store applied the write. Only meaningful for conditional
    /// writes.
    pub fn applied(&self) -> bool {
        self.applied
    }

    /// The entry's current values as echoed back for a rejected condition.
    pub fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    pub fn info(&self) -> &ExecutionInfo {
        &self.info
    }
}

/// Turns a write's result page into a [`MutationResult`], failing with
/// [`QueryError::ConditionNotMet`] when a declared condition did not hold.
///
/// Writes without a condition succeed whenever they executed.
pub fn evaluate(condition: &Condition, page: ResultPage) -> Result<MutationResult> {
    let result = MutationResult::from_page(page);

    let kind = match condition {
        Condition::None => return Ok(result),
        Condition::IfNotExists => ConditionKind::AlreadyExists,
        Condition::IfExists | Condition::Predicate(_) => ConditionKind::PredicateMismatch,
    };

    if result.applied {
        return Ok(result);
    }

    tracing::debug!(%kind, "conditional write not applied");
    Err(QueryError::ConditionNotMet {
        kind,
        current: result.current.map(Box::new),
    })
}
