//! Fluent construction of a [`ScanDescriptor`].
//!
//! Setters only record their input. Everything is checked in
//! [`ScanBuilder::build`], before any RPC is issued.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bound::{KeyRange, PartialRow, encode_bound};
use crate::client::ScanClient;
use crate::descriptor::ScanDescriptor;
use crate::error::{Error, Result};
use crate::predicate::{ColumnPredicate, PredicateSet};
use crate::projection::{ColumnSelection, resolve};
use crate::rpc::TableInfo;
use crate::scanner::Scanner;
use crate::types::{OrderMode, ReadMode, ReplicaSelection};

/// Builds a scan over one table.
///
/// ```no_run
/// # async fn demo(table: tabletscan_core::Table) -> tabletscan_core::Result<()> {
/// let mut scanner = table
///     .scanner()
///     .add_predicate(table.column("key")?.gt(19)?)
///     .add_predicate(table.column("key")?.lt(50)?)
///     .set_projected_column_names(&["key", "string_val"])
///     .open()
///     .await?;
/// while scanner.has_more_rows() {
///     for row in scanner.next_batch().await?.iter() {
///         println!("{row:?}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ScanBuilder {
    client: ScanClient,
    table: Arc<TableInfo>,
    selection: ColumnSelection,
    predicates: Vec<ColumnPredicate>,
    lower_bounds: Vec<PartialRow>,
    upper_bounds: Vec<PartialRow>,
    read_mode: Option<ReadMode>,
    snapshot_timestamp: Option<u64>,
    fault_tolerant: bool,
    order_mode: OrderMode,
    replica_selection: ReplicaSelection,
    batch_size_bytes: Option<usize>,
    batch_size_rows: Option<usize>,
    timeout: Option<Duration>,
}

impl ScanBuilder {
    pub(crate) fn new(client: ScanClient, table: Arc<TableInfo>) -> Self {
        Self {
            client,
            table,
            selection: ColumnSelection::All,
            predicates: Vec::new(),
            lower_bounds: Vec::new(),
            upper_bounds: Vec::new(),
            read_mode: None,
            snapshot_timestamp: None,
            fault_tolerant: false,
            order_mode: OrderMode::Unordered,
            replica_selection: ReplicaSelection::LeaderOnly,
            batch_size_bytes: None,
            batch_size_rows: None,
            timeout: None,
        }
    }

    pub fn table(&self) -> &Arc<TableInfo> {
        &self.table
    }

    /// Predicates on the same column are intersected.
    pub fn add_predicate(mut self, predicate: ColumnPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn add_predicates(mut self, predicates: impl IntoIterator<Item = ColumnPredicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    /// Return only the named columns, in this order. Replaces any earlier
    /// projection.
    pub fn set_projected_column_names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.selection =
            ColumnSelection::Names(names.iter().map(|n| n.as_ref().to_string()).collect());
        self
    }

    /// Return only the columns at these table indexes, in this order.
    /// Replaces any earlier projection.
    pub fn set_projected_column_indexes(mut self, indexes: &[usize]) -> Self {
        self.selection = ColumnSelection::Indexes(indexes.to_vec());
        self
    }

    /// Make the scan resumable after a tablet server failure. Implies an
    /// ordered snapshot scan.
    pub fn set_fault_tolerant(mut self) -> Self {
        self.fault_tolerant = true;
        self
    }

    pub fn set_read_mode(mut self, mode: ReadMode) -> Self {
        self.read_mode = Some(mode);
        self
    }

    /// Read at `timestamp`. Implies [`ReadMode::Snapshot`].
    pub fn set_snapshot_timestamp(mut self, timestamp: u64) -> Self {
        self.snapshot_timestamp = Some(timestamp);
        self
    }

    pub fn set_order_mode(mut self, mode: OrderMode) -> Self {
        self.order_mode = mode;
        self
    }

    pub fn set_replica_selection(mut self, selection: ReplicaSelection) -> Self {
        self.replica_selection = selection;
        self
    }

    pub fn set_batch_size_bytes(mut self, bytes: usize) -> Self {
        self.batch_size_bytes = Some(bytes);
        self
    }

    /// Cap the number of rows per batch, in addition to the byte size.
    pub fn set_batch_size_rows(mut self, rows: usize) -> Self {
        self.batch_size_rows = Some(rows);
        self
    }

    /// Per-RPC timeout.
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Inclusive lower bound on the primary key. With several bounds the
    /// tightest wins.
    pub fn add_lower_bound(mut self, bound: PartialRow) -> Self {
        self.lower_bounds.push(bound);
        self
    }

    /// Exclusive upper bound on the primary key. With several bounds the
    /// tightest wins.
    pub fn add_exclusive_upper_bound(mut self, bound: PartialRow) -> Self {
        self.upper_bounds.push(bound);
        self
    }

    /// Resolve and validate everything recorded so far.
    pub fn build(&self) -> Result<ScanDescriptor> {
        let schema = &self.table.schema;
        let projection = resolve(schema, &self.selection)?;

        let mut predicates = PredicateSet::new();
        for pred in &self.predicates {
            predicates.add(pred.clone());
        }

        let mut range = KeyRange::all();
        for bound in &self.lower_bounds {
            range.tighten_lower(self.encode(bound)?);
        }
        for bound in &self.upper_bounds {
            range.tighten_upper(self.encode(bound)?);
        }

        let (read_mode, order_mode) = if self.fault_tolerant {
            (ReadMode::Snapshot, OrderMode::Ordered)
        } else if self.snapshot_timestamp.is_some() {
            (ReadMode::Snapshot, self.order_mode)
        } else {
            (self.read_mode.unwrap_or_default(), self.order_mode)
        };
        if self.fault_tolerant && self.read_mode == Some(ReadMode::ReadLatest) {
            debug!(table = %self.table.name, "fault tolerance overrides read_latest");
        }

        let config = self.client.config();
        let descriptor = ScanDescriptor {
            table: self.table.clone(),
            projection,
            predicates,
            lower_bound: range.lower,
            upper_bound: range.upper,
            read_mode,
            snapshot_timestamp: self.snapshot_timestamp,
            fault_tolerant: self.fault_tolerant,
            order_mode,
            replica_selection: self.replica_selection,
            batch_size_bytes: self.batch_size_bytes.unwrap_or(config.default_batch_size_bytes),
            batch_size_rows: self.batch_size_rows,
            timeout: self.timeout.unwrap_or(config.default_timeout),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Build the descriptor and open a scanner on it.
    pub async fn open(self) -> Result<Scanner> {
        let descriptor = self.build()?;
        let mut scanner = Scanner::new(self.client, descriptor);
        scanner.open().await?;
        Ok(scanner)
    }

    pub(crate) fn client(&self) -> &ScanClient {
        &self.client
    }

    fn encode(&self, bound: &PartialRow) -> Result<Vec<u8>> {
        if bound.schema().as_ref() != self.table.schema.as_ref() {
            return Err(Error::InvalidArgument(format!(
                "bound was built for a different schema than table '{}'",
                self.table.name
            )));
        }
        Ok(encode_bound(&self.table.schema, bound)?)
    }
}
