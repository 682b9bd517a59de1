//! The immutable description of one scan.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bound::{KeyRange, predicate_key_range};
use crate::error::{Error, PredicateError, Result};
use crate::predicate::{EncodedPredicate, PredicateSet};
use crate::projection::{self, Projection};
use crate::rpc::TableInfo;
use crate::schema::Schema;
use crate::types::{OrderMode, ReadMode, ReplicaSelection};

/// Everything needed to open a scan: table, projection, predicates, bounds,
/// consistency and batching settings.
///
/// A descriptor can be cloned and opened any number of times; each open
/// creates an independent [`Scanner`](crate::scanner::Scanner).
#[derive(Debug, Clone, PartialEq)]
pub struct ScanDescriptor {
    pub(crate) table: Arc<TableInfo>,
    pub(crate) projection: Projection,
    pub(crate) predicates: PredicateSet,
    pub(crate) lower_bound: Option<Vec<u8>>,
    pub(crate) upper_bound: Option<Vec<u8>>,
    pub(crate) read_mode: ReadMode,
    pub(crate) snapshot_timestamp: Option<u64>,
    pub(crate) fault_tolerant: bool,
    pub(crate) order_mode: OrderMode,
    pub(crate) replica_selection: ReplicaSelection,
    pub(crate) batch_size_bytes: usize,
    pub(crate) batch_size_rows: Option<usize>,
    pub(crate) timeout: Duration,
}

impl ScanDescriptor {
    pub fn table(&self) -> &Arc<TableInfo> {
        &self.table
    }

    pub fn table_schema(&self) -> &Arc<Schema> {
        &self.table.schema
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn projection_schema(&self) -> &Arc<Schema> {
        self.projection.schema()
    }

    pub fn predicates(&self) -> &PredicateSet {
        &self.predicates
    }

    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    pub fn snapshot_timestamp(&self) -> Option<u64> {
        self.snapshot_timestamp
    }

    pub fn is_fault_tolerant(&self) -> bool {
        self.fault_tolerant
    }

    pub fn order_mode(&self) -> OrderMode {
        self.order_mode
    }

    pub fn replica_selection(&self) -> ReplicaSelection {
        self.replica_selection
    }

    pub fn batch_size_bytes(&self) -> usize {
        self.batch_size_bytes
    }

    pub fn batch_size_rows(&self) -> Option<usize> {
        self.batch_size_rows
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check the descriptor against its table schema. Predicates may name
    /// columns that are not projected.
    pub fn validate(&self) -> Result<()> {
        let schema = &self.table.schema;
        let resolved = projection::from_indexes(schema, self.projection.indexes().to_vec())?;
        if resolved != self.projection {
            return Err(Error::InvalidArgument(
                "projection does not match the table schema".into(),
            ));
        }
        for pred in self.predicates.iter() {
            match schema.column(pred.column_index()) {
                Some(col) if col == pred.column() => {}
                Some(col) => {
                    return Err(PredicateError::TypeMismatch {
                        column: pred.column().name.clone(),
                        expected: col.data_type,
                        actual: pred.column().data_type.to_string(),
                    }
                    .into());
                }
                None => {
                    return Err(PredicateError::UnknownColumn(pred.column().name.clone()).into());
                }
            }
        }
        if self.fault_tolerant
            && (self.read_mode != ReadMode::Snapshot || self.order_mode != OrderMode::Ordered)
        {
            return Err(Error::InvalidArgument(
                "fault-tolerant scans must be ordered snapshot scans".into(),
            ));
        }
        if self.batch_size_bytes == 0 {
            return Err(Error::InvalidArgument("batch size must be > 0".into()));
        }
        if self.batch_size_rows == Some(0) {
            return Err(Error::InvalidArgument("batch row limit must be > 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidArgument("timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Explicit bounds intersected with the range implied by key predicates.
    pub fn effective_range(&self) -> Result<KeyRange> {
        let explicit = KeyRange::bounded(self.lower_bound.clone(), self.upper_bound.clone());
        let implied = predicate_key_range(&self.table.schema, &self.predicates)?;
        Ok(explicit.intersect(&implied))
    }

    /// Whether the scan is known to return no rows without contacting any
    /// server.
    pub fn matches_nothing(&self) -> Result<bool> {
        Ok(self.predicates.matches_nothing() || self.effective_range()?.is_empty())
    }

    /// A copy restricted to `range` (used for per-tablet scan tokens).
    pub(crate) fn restricted_to(&self, range: &KeyRange) -> Self {
        let mut restricted = self.clone();
        let narrowed =
            KeyRange::bounded(self.lower_bound.clone(), self.upper_bound.clone()).intersect(range);
        restricted.lower_bound = narrowed.lower;
        restricted.upper_bound = narrowed.upper;
        restricted
    }

    pub fn to_wire(&self) -> DescriptorWire {
        DescriptorWire {
            table_id: self.table.id.clone(),
            table_name: self.table.name.clone(),
            projection: self.projection.indexes().to_vec(),
            predicates: self.predicates.to_encoded(),
            lower_bound: self.lower_bound.clone(),
            upper_bound: self.upper_bound.clone(),
            read_mode: self.read_mode,
            snapshot_timestamp: self.snapshot_timestamp,
            fault_tolerant: self.fault_tolerant,
            order_mode: self.order_mode,
            replica_selection: self.replica_selection,
            batch_size_bytes: self.batch_size_bytes,
            batch_size_rows: self.batch_size_rows,
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Rebuild a descriptor against the live `table`, re-validating the
    /// projection and every predicate.
    pub fn from_wire(table: Arc<TableInfo>, wire: &DescriptorWire) -> Result<Self> {
        let projection = projection::from_indexes(&table.schema, wire.projection.clone())?;
        let predicates = PredicateSet::from_encoded(&table.schema, &wire.predicates)?;
        let descriptor = ScanDescriptor {
            table,
            projection,
            predicates,
            lower_bound: wire.lower_bound.clone(),
            upper_bound: wire.upper_bound.clone(),
            read_mode: wire.read_mode,
            snapshot_timestamp: wire.snapshot_timestamp,
            fault_tolerant: wire.fault_tolerant,
            order_mode: wire.order_mode,
            replica_selection: wire.replica_selection,
            batch_size_bytes: wire.batch_size_bytes,
            batch_size_rows: wire.batch_size_rows,
            timeout: Duration::from_millis(wire.timeout_ms),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Serializable form of a [`ScanDescriptor`], carried by scan tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorWire {
    pub table_id: String,
    pub table_name: String,
    pub projection: Vec<usize>,
    pub predicates: Vec<EncodedPredicate>,
    pub lower_bound: Option<Vec<u8>>,
    pub upper_bound: Option<Vec<u8>>,
    pub read_mode: ReadMode,
    pub snapshot_timestamp: Option<u64>,
    pub fault_tolerant: bool,
    pub order_mode: OrderMode,
    pub replica_selection: ReplicaSelection,
    pub batch_size_bytes: usize,
    pub batch_size_rows: Option<usize>,
    pub timeout_ms: u64,
}
