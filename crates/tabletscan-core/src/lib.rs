//! # tabletscan
//!
//! The client-side scan engine of a distributed tablet store.
//!
//! A table is split by primary key into tablets, each replicated across
//! tablet servers. A scan describes which rows and columns to read
//! (predicates, projection, key bounds) and how (consistency, ordering,
//! batching, fault tolerance); the [`Scanner`] then walks the tablets in key
//! order and streams back decoded [`RowBatch`]es. Fault-tolerant scans survive
//! tablet server failures by resuming after the last delivered primary key at
//! the same snapshot.
//!
//! The engine does not speak any network protocol itself. Table and tablet
//! locations come from a [`TabletLocator`] and scan RPCs go through a
//! [`TabletTransport`]; both are supplied by the caller.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabletscan_core::{ScanClient, TabletLocator, TabletTransport};
//!
//! # async fn demo(
//! #     locator: Arc<dyn TabletLocator>,
//! #     transport: Arc<dyn TabletTransport>,
//! # ) -> tabletscan_core::Result<()> {
//! let client = ScanClient::new(locator, transport);
//! let table = client.open_table("metrics").await?;
//!
//! let mut lower = table.new_bound();
//! lower.set("key", 50)?;
//!
//! let rows = table
//!     .scanner()
//!     .add_predicate(table.column("string_val")?.ge("hello_9")?)
//!     .add_lower_bound(lower)
//!     .set_projected_column_names(&["key", "string_val"])
//!     .set_fault_tolerant()
//!     .open()
//!     .await?
//!     .read_all_tuples()
//!     .await?;
//! println!("{} rows", rows.len());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod bound;
pub mod builder;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod encoding;
pub mod error;
pub mod meta_cache;
pub mod predicate;
pub mod projection;
pub mod rpc;
pub mod scanner;
pub mod schema;
pub mod token;
pub mod types;
pub mod value;

pub use batch::{Row, RowBatch};
pub use bound::{KeyRange, PartialRow};
pub use builder::ScanBuilder;
pub use client::{ScanClient, Table, TableColumn};
pub use config::{RetryPolicy, ScanConfig};
pub use descriptor::ScanDescriptor;
pub use error::{Error, ErrorKind, Result};
pub use predicate::{ColumnPredicate, Operand, Operator, PredicateSet};
pub use projection::ColumnSelection;
pub use rpc::{TabletLocator, TabletTransport};
pub use scanner::{ScanCanceller, ScanState, ScanStats, Scanner};
pub use schema::{ColumnSchema, Schema};
pub use token::{ScanToken, ScanTokenBuilder};
pub use types::{DataType, OrderMode, ReadMode, ReplicaSelection};
pub use value::Value;
