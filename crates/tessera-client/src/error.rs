//! Query error types.

use std::fmt::{self, Display};
use std::time::Duration;

use tessera_types::Row;
use tessera_types::key_encoder::KeyEncodingError;
use thiserror::Error;

use crate::network::NetworkError;

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Why a conditional write was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// An insert-style existence condition found the entry already present.
    AlreadyExists,
    /// An update/delete-style condition did not hold on the current row.
    PredicateMismatch,
}

impl Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionKind::AlreadyExists => f.write_str("entry already exists"),
            ConditionKind::PredicateMismatch => f.write_str("predicate mismatch"),
        }
    }
}

/// Errors surfaced by the query layer.
///
/// `Clone` so that one failure can be handed to every waiter of a shared
/// page fetch or cache load.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Network or timeout failure reported by the network client, unwrapped
    /// to its root cause. Never retried by this layer.
    #[error("transport error: {0}")]
    Transport(NetworkError),

    /// A single-row read returned more than one row.
    #[error("expected at most one row, got {count}")]
    TooManyResults { count: usize },

    /// The key echoed back by the store differs from the requested key.
    #[error("key echo mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch { expected: String, actual: String },

    /// A conditional write was rejected. This is an expected outcome, not a
    /// fault.
    #[error("condition not met: {kind}")]
    ConditionNotMet {
        kind: ConditionKind,
        /// Current row as returned by the store, when it sent one.
        current: Option<Box<Row>>,
    },

    /// Reactive protocol misuse (duplicate subscribe, non-positive request).
    #[error("subscription protocol violation: {0}")]
    SubscriptionProtocol(String),

    /// An entity codec could not decode a row.
    #[error("codec error: {0}")]
    Codec(String),

    /// A key could not be encoded for the integrity check.
    #[error("key encoding error: {0}")]
    KeyEncoding(#[from] KeyEncodingError),

    /// A blocking wait hit its bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl QueryError {
    /// Creates a `Codec` error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Returns true if this is a rejected conditional write.
    pub fn is_condition_not_met(&self) -> bool {
        matches!(self, Self::ConditionNotMet { .. })
    }

    /// Returns the condition kind if this is a `ConditionNotMet` error.
    pub fn condition_kind(&self) -> Option<ConditionKind> {
        match self {
            Self::ConditionNotMet { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true if the failure came from the network client.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<NetworkError> for QueryError {
    fn from(error: NetworkError) -> Self {
        Self::Transport(error.into_root_cause())
    }
}
