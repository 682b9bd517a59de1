//! The contract between the scan engine and the storage service.
//!
//! The engine never talks to a tablet server directly. It resolves tablets
//! through a [`TabletLocator`] and issues scan RPCs through a
//! [`TabletTransport`], both supplied by the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bound::KeyRange;
use crate::error::RpcError;
use crate::predicate::EncodedPredicate;
use crate::schema::Schema;
use crate::types::{OrderMode, ReadMode, ServerId, TableId, TabletId};

/// A tablet's slice of the key space, `[start_key, end_key)`. Empty keys are
/// unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl Partition {
    pub fn key_range(&self) -> KeyRange {
        KeyRange::new(Some(self.start_key.clone()), Some(self.end_key.clone()))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.key_range().contains(key)
    }

    /// Whether this is the last tablet of the table.
    pub fn is_last(&self) -> bool {
        self.end_key.is_empty()
    }

    /// Start key of the following partition, or `None` if no later partition
    /// overlaps `range`.
    pub fn next_start_within(&self, range: &KeyRange) -> Option<Vec<u8>> {
        if self.is_last() {
            return None;
        }
        if range.upper.as_ref().is_some_and(|upper| self.end_key >= *upper) {
            return None;
        }
        Some(self.end_key.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaRole {
    Leader,
    Follower,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub server: ServerId,
    pub role: ReplicaRole,
}

/// Where a tablet lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletLocation {
    pub tablet_id: TabletId,
    pub partition: Partition,
    pub replicas: Vec<ReplicaInfo>,
}

impl TabletLocation {
    pub fn leader(&self) -> Option<&ServerId> {
        self.replicas
            .iter()
            .find(|r| r.role == ReplicaRole::Leader)
            .map(|r| &r.server)
    }
}

/// Table metadata returned by the locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    pub schema: Arc<Schema>,
}

/// Open a server-side scanner on one tablet and fetch the first batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenScanRequest {
    pub table_id: TableId,
    pub tablet_id: TabletId,
    /// Table column indexes to return, in order.
    pub projection: Vec<usize>,
    pub predicates: Vec<EncodedPredicate>,
    /// Inclusive; already intersected with the tablet's partition.
    pub lower_bound: Option<Vec<u8>>,
    /// Exclusive.
    pub upper_bound: Option<Vec<u8>>,
    pub read_mode: ReadMode,
    pub snapshot_timestamp: Option<u64>,
    pub order_mode: OrderMode,
    pub leader_only: bool,
    pub batch_size_bytes: usize,
    pub batch_size_rows: Option<usize>,
    pub timeout_ms: u64,
}

/// Fetch the next batch from an open server-side scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueScanRequest {
    pub handle: String,
    /// Increases by one per call on the same handle.
    pub call_seq_id: u64,
    pub batch_size_bytes: usize,
    pub batch_size_rows: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    /// Server-side scanner handle; `None` once the tablet is exhausted.
    pub handle: Option<String>,
    /// Row batch payload shaped by the projection.
    pub data: Vec<u8>,
    pub has_more: bool,
    /// The timestamp the server read at. Set on open.
    pub snapshot_timestamp: Option<u64>,
    /// Encoded primary key of the last row in `data`, when ordered.
    pub last_primary_key: Option<Vec<u8>>,
}

/// Resolves tables and tablets.
#[async_trait]
pub trait TabletLocator: Send + Sync + 'static {
    async fn lookup_table(&self, name: &str) -> Result<TableInfo, RpcError>;

    /// The tablet whose partition contains `key` (empty key: the first tablet).
    async fn locate_tablet(&self, table_id: &str, key: &[u8]) -> Result<TabletLocation, RpcError>;

    /// Forget any cached location of `tablet_id`.
    async fn invalidate(&self, tablet_id: &str);
}

/// Issues scan RPCs to a named tablet server.
#[async_trait]
pub trait TabletTransport: Send + Sync + 'static {
    async fn open_scan(
        &self,
        server: &str,
        req: OpenScanRequest,
    ) -> Result<ScanResponse, RpcError>;

    async fn continue_scan(
        &self,
        server: &str,
        req: ContinueScanRequest,
    ) -> Result<ScanResponse, RpcError>;

    async fn close_scan(&self, server: &str, handle: &str) -> Result<(), RpcError>;

    async fn keep_alive(&self, server: &str, handle: &str) -> Result<(), RpcError>;
}
