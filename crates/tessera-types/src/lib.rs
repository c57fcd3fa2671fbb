//! # tessera-types: Core types for `Tessera`
//!
//! This crate contains the shared types used across the `Tessera` client:
//! - Wire values and rows ([`Value`], [`Row`], [`ColumnSpec`], [`DataType`])
//! - Consistency levels ([`Consistency`], [`SerialConsistency`])
//! - Retry policy selection ([`RetryPolicy`])
//! - Opaque server handles ([`PagingState`], [`PreparedId`])
//! - Write-time overrides ([`WriteTimestamp`])
//! - Deterministic key encoding ([`key_encoder`])

use std::fmt::{self, Display};
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod key_encoder;
mod row;
mod value;

pub use row::{APPLIED_COLUMN, ColumnSpec, Row};
pub use value::{DataType, Value};

// ============================================================================
// Consistency Levels
// ============================================================================

/// Replica acknowledgement level for reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

impl FromStr for Consistency {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "ANY" => Ok(Consistency::Any),
            "ONE" => Ok(Consistency::One),
            "TWO" => Ok(Consistency::Two),
            "THREE" => Ok(Consistency::Three),
            "QUORUM" => Ok(Consistency::Quorum),
            "ALL" => Ok(Consistency::All),
            "LOCAL_QUORUM" => Ok(Consistency::LocalQuorum),
            "EACH_QUORUM" => Ok(Consistency::EachQuorum),
            "LOCAL_ONE" => Ok(Consistency::LocalOne),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Consistency level for the Paxos phase of conditional writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SerialConsistency {
    Serial,
    LocalSerial,
}

impl Display for SerialConsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialConsistency::Serial => f.write_str("SERIAL"),
            SerialConsistency::LocalSerial => f.write_str("LOCAL_SERIAL"),
        }
    }
}

impl FromStr for SerialConsistency {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "SERIAL" => Ok(SerialConsistency::Serial),
            "LOCAL_SERIAL" => Ok(SerialConsistency::LocalSerial),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Retry behaviour requested from the network client.
///
/// This layer never retries on its own; the policy is forwarded with each
/// statement and interpreted by the network client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicy {
    /// The network client's own default policy.
    #[default]
    Default,
    /// Never retry; surface every failure.
    Fallthrough,
    /// Retry once at a lower consistency level when replicas are short.
    DowngradingConsistency,
}

/// Returned when a consistency level name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown consistency level: {0}")]
pub struct ParseLevelError(String);

// ============================================================================
// Server Handles - opaque bytes owned by the store
// ============================================================================

/// Opaque continuation token for fetching the next page of a result.
///
/// Present on a page iff the store may have more rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PagingState(Bytes);

impl PagingState {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

/// Server-side identifier of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedId(Bytes);

impl PreparedId {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl Display for PreparedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Write Time
// ============================================================================

/// Explicit write timestamp, in microseconds since the Unix epoch.
///
/// The store resolves concurrent writes to the same cell by this value, so an
/// override lets callers order writes deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WriteTimestamp(i64);

impl WriteTimestamp {
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros())
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }
}

impl From<DateTime<Utc>> for WriteTimestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self::from_datetime(at)
    }
}
