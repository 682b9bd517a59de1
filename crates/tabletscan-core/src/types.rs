//! Core types: column data types, identifiers, read/order modes, limits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a table, assigned by the storage service.
pub type TableId = String;

/// Identifier of a tablet (one horizontal partition of a table).
pub type TabletId = String;

/// Identifier of a tablet server hosting replicas.
pub type ServerId = String;

/// Default per-batch size limit requested from tablet servers (1 MB).
pub const DEFAULT_BATCH_SIZE_BYTES: usize = 1024 * 1024;

/// Largest precision a `Decimal` column may declare (fits an `i128`).
pub const MAX_DECIMAL_PRECISION: u8 = 38;

/// The type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Bool,
    String,
    Binary,
    /// Microseconds since the Unix epoch, UTC.
    UnixtimeMicros,
    /// Fixed-point decimal stored as an unscaled `i128`.
    Decimal { precision: u8, scale: u8 },
}

impl DataType {
    /// Width in bytes of a fixed-width cell, or `None` for String/Binary.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::Bool => Some(1),
            DataType::Int16 => Some(2),
            DataType::Int32 | DataType::Float => Some(4),
            DataType::Int64 | DataType::Double | DataType::UnixtimeMicros => Some(8),
            DataType::Decimal { .. } => Some(16),
            DataType::String | DataType::Binary => None,
        }
    }

    /// Whether a column of this type may be part of a primary key.
    pub fn is_keyable(self) -> bool {
        !matches!(self, DataType::Float | DataType::Double | DataType::Bool)
    }

    /// Whether values of this type are integers (including timestamps).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UnixtimeMicros
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Bool => "bool",
            DataType::String => "string",
            DataType::Binary => "binary",
            DataType::UnixtimeMicros => "unixtime_micros",
            DataType::Decimal { .. } => "decimal",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Decimal { precision, scale } => write!(f, "decimal({precision}, {scale})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Consistency mode of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Each tablet returns whatever is committed when it is read.
    #[default]
    ReadLatest,
    /// All tablets are read at a single timestamp, chosen by the first tablet
    /// server contacted unless set explicitly.
    Snapshot,
}

/// Row delivery order within a tablet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderMode {
    #[default]
    Unordered,
    /// Rows are returned in primary key order. Required for resumable scans.
    Ordered,
}

/// Which replica of a tablet the scanner contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSelection {
    #[default]
    LeaderOnly,
    /// The first replica that is not blacklisted, leader or follower.
    AnyReplica,
}
