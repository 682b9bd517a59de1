//! Error types for all scan engine operations.
//!
//! Every error is `Clone`: a scanner that hits a fatal error keeps it and
//! hands the same error back on every later call.

use std::time::Duration;

use thiserror::Error;

use crate::types::{DataType, ServerId, TabletId};

/// Top-level error type for tabletscan operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Predicate(#[from] PredicateError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Bound(#[from] BoundError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("cannot encode row {row}, column '{column}': {reason}")]
    Encode {
        row: usize,
        column: String,
        reason: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema has no columns")]
    Empty,

    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("primary key is not set")]
    MissingPrimaryKey,

    #[error("unknown primary key column: {0}")]
    UnknownKeyColumn(String),

    #[error("primary key columns must be the leading columns in order; '{0}' is out of place")]
    KeyColumnOrder(String),

    #[error("primary key column '{0}' must not be nullable")]
    NullableKeyColumn(String),

    #[error("column '{name}' of type {data_type} cannot be part of a primary key")]
    UnkeyableType { name: String, data_type: DataType },

    #[error("invalid decimal column '{name}': precision {precision}, scale {scale}")]
    InvalidDecimal {
        name: String,
        precision: u8,
        scale: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    #[error("type mismatch for column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: String,
    },

    #[error("cannot compare column '{0}' against null")]
    NullOperand(String),

    #[error("unsupported operator {op} for column '{column}': {reason}")]
    UnsupportedOperator {
        column: String,
        op: String,
        reason: String,
    },

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("invalid predicate: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("column index {index} out of range (table has {count} columns)")]
    InvalidIndex { index: usize, count: usize },

    #[error("column '{0}' selected more than once")]
    DuplicateColumn(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundError {
    #[error("column '{0}' is not a primary key column")]
    NotKeyColumn(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("key column '{0}' is set but an earlier key column is not")]
    KeyPrefixGap(String),

    #[error("bound has no key columns set")]
    EmptyBound,

    #[error("type mismatch for key column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("payload has {actual} columns, projection expects {expected}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("column {column}: null bitmap flag does not match nullability")]
    NullabilityMismatch { column: usize },

    #[error("column {column}: block length {actual}, expected {expected}")]
    LengthMismatch {
        column: usize,
        expected: usize,
        actual: usize,
    },

    #[error("column {column}: invalid offsets")]
    InvalidOffsets { column: usize },

    #[error("column {column}: invalid UTF-8 in string cell {row}")]
    InvalidUtf8 { column: usize, row: usize },

    #[error("column {column}: invalid bool byte {byte:#04x} in row {row}")]
    InvalidBool { column: usize, row: usize, byte: u8 },

    #[error("payload claims {rows} rows, at most {limit} allowed")]
    TooManyRows { rows: usize, limit: usize },

    #[error("{0} trailing bytes after last column")]
    TrailingBytes(usize),

    #[error("malformed encoded key")]
    MalformedKey,

    #[error("malformed cell for type {0}")]
    MalformedCell(DataType),

    #[error("unknown predicate code: {0}")]
    UnknownPredicateCode(u8),

    #[error("malformed scan token: {0}")]
    MalformedToken(String),
}

/// Failures reported by the storage service or the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("tablet {tablet} unavailable on {server}: {message}")]
    TabletUnavailable {
        tablet: TabletId,
        server: ServerId,
        message: String,
    },

    #[error("replica of tablet {tablet} on {server} is not the leader")]
    NotLeader { tablet: TabletId, server: ServerId },

    #[error("server {server} unavailable: {message}")]
    ServerUnavailable { server: ServerId, message: String },

    #[error("tablet {tablet} not found on {server}")]
    TabletNotFound { tablet: TabletId, server: ServerId },

    #[error("scanner {0} not found")]
    ScannerNotFound(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Whether the failure may succeed after re-resolving the tablet or
    /// trying another replica.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RpcError::TabletUnavailable { .. }
                | RpcError::NotLeader { .. }
                | RpcError::ServerUnavailable { .. }
                | RpcError::TabletNotFound { .. }
                | RpcError::ScannerNotFound(_)
        )
    }

    /// The server that should not be contacted again for this scan, if the
    /// failure is specific to one server.
    pub fn failed_server(&self) -> Option<&ServerId> {
        match self {
            RpcError::TabletUnavailable { server, .. }
            | RpcError::ServerUnavailable { server, .. }
            | RpcError::TabletNotFound { server, .. } => Some(server),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanError {
    #[error("scan RPC timed out after {0:?}")]
    Timeout(Duration),

    #[error("scanner {0} expired on the server and the scan is not fault tolerant")]
    ScanExpired(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    #[error("scan cancelled")]
    Cancelled,

    #[error("scanner was already opened; build a new scanner from the descriptor")]
    AlreadyOpened,

    #[error("scanner is not open")]
    NotOpen,

    #[error("scanner is closed")]
    Closed,

    #[error("cannot resume tablet {0}: no resumption key was returned")]
    CannotResume(TabletId),

    #[error("scan token was built for table id '{expected}', found '{actual}'")]
    TableMismatch { expected: String, actual: String },
}

/// Coarse classification of errors, matching the scan engine's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad predicate type, unknown column, out-of-range index. Raised while
    /// building or validating, never in the middle of a scan.
    InvalidArgument,
    Timeout,
    ScanExpired,
    TabletUnavailable,
    LeaderChanged,
    NotFound,
    DecodeError,
    Cancelled,
    IllegalState,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Schema(_)
            | Error::Predicate(_)
            | Error::Projection(_)
            | Error::Bound(_)
            | Error::Encode { .. }
            | Error::InvalidArgument(_)
            | Error::Config(_) => ErrorKind::InvalidArgument,
            Error::Decode(_) => ErrorKind::DecodeError,
            Error::Rpc(e) => match e {
                RpcError::TabletUnavailable { .. }
                | RpcError::ServerUnavailable { .. }
                | RpcError::TabletNotFound { .. } => ErrorKind::TabletUnavailable,
                RpcError::NotLeader { .. } => ErrorKind::LeaderChanged,
                RpcError::ScannerNotFound(_) => ErrorKind::ScanExpired,
                RpcError::TableNotFound(_) => ErrorKind::NotFound,
                RpcError::InvalidRequest(_) => ErrorKind::InvalidArgument,
                RpcError::Internal(_) => ErrorKind::Internal,
            },
            Error::Scan(e) => match e {
                ScanError::Timeout(_) => ErrorKind::Timeout,
                ScanError::ScanExpired(_) => ErrorKind::ScanExpired,
                ScanError::RetriesExhausted { last, .. } => last.kind(),
                ScanError::Cancelled => ErrorKind::Cancelled,
                ScanError::AlreadyOpened | ScanError::NotOpen | ScanError::Closed => {
                    ErrorKind::IllegalState
                }
                ScanError::CannotResume(_) => ErrorKind::Internal,
                ScanError::TableMismatch { .. } => ErrorKind::InvalidArgument,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
