//! An in-process tablet cluster.
//!
//! `MiniCluster` plays both halves of the storage service: it resolves tables
//! and tablets like a master and answers scan RPCs like a set of tablet
//! servers. Rows are kept per tablet in key order with every written version,
//! so snapshot scans see the table as of their timestamp. Servers can be
//! killed, leaders stepped down, scanners expired and faults injected, which
//! is what the fault-tolerance tests drive.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tabletscan_core::batch::encode_batch;
use tabletscan_core::encoding::{encode_key_prefix, encode_row_key, successor};
use tabletscan_core::error::RpcError;
use tabletscan_core::predicate::PredicateSet;
use tabletscan_core::projection::{ColumnSelection, resolve};
use tabletscan_core::rpc::{
    ContinueScanRequest, OpenScanRequest, Partition, ReplicaInfo, ReplicaRole, ScanResponse,
    TableInfo, TabletLocation, TabletLocator, TabletTransport,
};
use tabletscan_core::types::{DataType, OrderMode, ReadMode, ServerId, TableId};
use tabletscan_core::{ColumnSchema, Schema, Value};

/// Mini cluster settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Tablet servers in the cluster, named `ts-0`, `ts-1`, ...
    /// Default: 3
    pub num_servers: usize,

    /// Idle time after which a server-side scanner is discarded.
    /// Default: 60 seconds
    pub scanner_ttl: Duration,

    /// Hard cap on rows per batch, whatever the client asks for.
    /// Default: 10,000
    pub max_batch_rows: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_servers: 3,
            scanner_ttl: Duration::from_secs(60),
            max_batch_rows: 10_000,
        }
    }
}

impl ServerConfig {
    /// Builder-style: set the number of tablet servers.
    pub fn with_num_servers(mut self, n: usize) -> Self {
        self.num_servers = n;
        self
    }

    /// Builder-style: set the scanner TTL.
    pub fn with_scanner_ttl(mut self, ttl: Duration) -> Self {
        self.scanner_ttl = ttl;
        self
    }

    /// Builder-style: set the per-batch row cap.
    pub fn with_max_batch_rows(mut self, rows: usize) -> Self {
        self.max_batch_rows = rows;
        self
    }
}

/// Which scan RPC an injected fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOp {
    Open,
    Continue,
}

/// A one-shot fault consumed by the next matching RPC.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the call with this error.
    Error(RpcError),
    /// Stall the call before it is served.
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct Version {
    write_ts: u64,
    row: Vec<Value>,
}

struct TabletState {
    location: TabletLocation,
    rows: BTreeMap<Vec<u8>, Vec<Version>>,
}

struct TableState {
    info: TableInfo,
    tablets: Vec<TabletState>,
}

impl TableState {
    fn tablet_for(&self, key: &[u8]) -> Option<usize> {
        self.tablets
            .iter()
            .position(|t| t.location.partition.contains(key))
    }
}

/// A server-side scanner session.
struct ServerScanner {
    server: ServerId,
    table_id: TableId,
    tablet_index: usize,
    projection: Vec<usize>,
    projection_schema: Arc<Schema>,
    predicates: PredicateSet,
    /// Next key to read, inclusive.
    next_key: Vec<u8>,
    upper: Option<Vec<u8>>,
    /// `None` reads the latest version on every batch.
    read_ts: Option<u64>,
    ordered: bool,
    leader_only: bool,
    batch_size_bytes: usize,
    batch_size_rows: Option<usize>,
    last_seq: u64,
    last_access: Instant,
}

#[derive(Default)]
struct ClusterState {
    clock: u64,
    next_table: u64,
    next_scanner: u64,
    tables: HashMap<TableId, TableState>,
    names: HashMap<String, TableId>,
    scanners: HashMap<String, ServerScanner>,
    down: HashSet<ServerId>,
    faults: VecDeque<(ScanOp, Fault)>,
}

struct Batch {
    data: Vec<u8>,
    last_key: Option<Vec<u8>>,
    has_more: bool,
}

/// An in-process cluster of tablet servers.
pub struct MiniCluster {
    config: ServerConfig,
    servers: Vec<ServerId>,
    state: Mutex<ClusterState>,
}

impl MiniCluster {
    pub fn new(config: ServerConfig) -> Self {
        let servers = (0..config.num_servers.max(1))
            .map(|i| format!("ts-{i}"))
            .collect();
        Self {
            config,
            servers,
            state: Mutex::new(ClusterState::default()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn servers(&self) -> &[ServerId] {
        &self.servers
    }

    /// The current logical time. Every write advances it by one.
    pub fn now(&self) -> u64 {
        self.state.lock().clock
    }

    /// Create a table split into tablets at `split_keys` (key prefixes, in
    /// any order). Each tablet gets up to three replicas, the first leading.
    pub fn create_table(
        &self,
        name: &str,
        schema: Schema,
        split_keys: &[Vec<Value>],
    ) -> Result<TableInfo, RpcError> {
        schema
            .validate()
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
        let mut splits = split_keys
            .iter()
            .map(|k| encode_key_prefix(&schema, k))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
        splits.sort();
        splits.dedup();
        splits.retain(|k| !k.is_empty());

        let mut state = self.state.lock();
        if state.names.contains_key(name) {
            return Err(RpcError::InvalidRequest(format!("table already exists: {name}")));
        }
        state.next_table += 1;
        let table_id = format!("table-{}", state.next_table);

        let mut bounds = vec![Vec::new()];
        bounds.extend(splits);
        bounds.push(Vec::new());
        let replication = self.servers.len().min(3);
        let tablets = bounds
            .windows(2)
            .enumerate()
            .map(|(i, w)| TabletState {
                location: TabletLocation {
                    tablet_id: format!("{table_id}-tablet-{i}"),
                    partition: Partition {
                        start_key: w[0].clone(),
                        end_key: w[1].clone(),
                    },
                    replicas: (0..replication)
                        .map(|r| ReplicaInfo {
                            server: self.servers[(i + r) % self.servers.len()].clone(),
                            role: if r == 0 {
                                ReplicaRole::Leader
                            } else {
                                ReplicaRole::Follower
                            },
                        })
                        .collect(),
                },
                rows: BTreeMap::new(),
            })
            .collect::<Vec<_>>();

        let info = TableInfo {
            id: table_id.clone(),
            name: name.to_string(),
            schema: Arc::new(schema),
        };
        info!(table = name, id = %table_id, tablets = tablets.len(), "created table");
        state.names.insert(name.to_string(), table_id.clone());
        state.tables.insert(
            table_id,
            TableState {
                info: info.clone(),
                tablets,
            },
        );
        Ok(info)
    }

    /// Write a row (all columns, table order), replacing any earlier version
    /// for newer readers. Returns the write timestamp.
    pub fn insert(&self, table: &str, row: Vec<Value>) -> Result<u64, RpcError> {
        let mut state = self.state.lock();
        let table_id = state
            .names
            .get(table)
            .cloned()
            .ok_or_else(|| RpcError::TableNotFound(table.to_string()))?;
        let ts = state.clock + 1;
        let table_state = state
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| RpcError::TableNotFound(table.to_string()))?;

        let row = check_row(&table_state.info.schema, row)?;
        let key = encode_row_key(&table_state.info.schema, &row)
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
        let index = table_state
            .tablet_for(&key)
            .ok_or_else(|| RpcError::Internal("no tablet covers key".into()))?;
        table_state.tablets[index]
            .rows
            .entry(key)
            .or_default()
            .push(Version { write_ts: ts, row });
        state.clock = ts;
        Ok(ts)
    }

    /// Create `name` with `key INT32`, `int_val INT32`, `string_val STRING`
    /// and rows `0..rows`, where row `i` holds `(i, i * 2, "hello_i")`. The
    /// key space is split evenly into `tablets` tablets.
    pub fn create_demo_table(
        &self,
        name: &str,
        rows: i32,
        tablets: usize,
    ) -> Result<TableInfo, RpcError> {
        let schema = Schema::builder()
            .add_column(ColumnSchema::new("key", DataType::Int32).not_null())
            .add_column(ColumnSchema::new("int_val", DataType::Int32))
            .add_column(ColumnSchema::new("string_val", DataType::String))
            .set_primary_keys(&["key"])
            .build()
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
        let tablets = tablets.max(1) as i32;
        let step = (rows / tablets).max(1);
        let splits: Vec<Vec<Value>> = (1..tablets)
            .map(|i| vec![Value::Int32(i * step)])
            .collect();
        let info = self.create_table(name, schema, &splits)?;
        for i in 0..rows {
            self.insert(name, demo_row(i))?;
        }
        Ok(info)
    }

    /// Tablet locations of `table`, in key order.
    pub fn tablets(&self, table: &str) -> Vec<TabletLocation> {
        let state = self.state.lock();
        state
            .names
            .get(table)
            .and_then(|id| state.tables.get(id))
            .map(|t| t.tablets.iter().map(|t| t.location.clone()).collect())
            .unwrap_or_default()
    }

    /// Queue a fault for the next `op` RPC.
    pub fn inject_fault(&self, op: ScanOp, fault: Fault) {
        self.state.lock().faults.push_back((op, fault));
    }

    /// Drop every server-side scanner, as if all had outlived their TTL.
    pub fn expire_scanners(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.scanners.len();
        state.scanners.clear();
        debug!(count = n, "expired all scanners");
        n
    }

    pub fn open_scanner_count(&self) -> usize {
        self.state.lock().scanners.len()
    }

    /// Stop a tablet server: its scanners are lost and every tablet it led
    /// elects the next live replica.
    pub fn kill_server(&self, server: &str) {
        let mut state = self.state.lock();
        state.down.insert(server.to_string());
        state.scanners.retain(|_, s| s.server != server);
        let down = state.down.clone();
        for table in state.tables.values_mut() {
            for tablet in &mut table.tablets {
                let leads = tablet.location.leader().is_some_and(|l| l == server);
                if leads {
                    elect_next_leader(&mut tablet.location, &down);
                }
            }
        }
        warn!(server, "killed tablet server");
    }

    pub fn revive_server(&self, server: &str) {
        self.state.lock().down.remove(server);
        info!(server, "revived tablet server");
    }

    /// Move leadership of `tablet_id` to its next replica. Returns the new
    /// leader.
    pub fn step_down(&self, tablet_id: &str) -> Option<ServerId> {
        let mut state = self.state.lock();
        let down = state.down.clone();
        let tablet = state
            .tables
            .values_mut()
            .flat_map(|t| t.tablets.iter_mut())
            .find(|t| t.location.tablet_id == tablet_id)?;
        elect_next_leader(&mut tablet.location, &down);
        let leader = tablet.location.leader().cloned();
        info!(tablet = tablet_id, leader = ?leader, "leader stepped down");
        leader
    }

    fn take_fault(&self, op: ScanOp) -> Option<Fault> {
        let mut state = self.state.lock();
        let pos = state.faults.iter().position(|(o, _)| *o == op)?;
        state.faults.remove(pos).map(|(_, f)| f)
    }

    async fn apply_fault(&self, op: ScanOp) -> Result<(), RpcError> {
        match self.take_fault(op) {
            Some(Fault::Error(e)) => {
                debug!(?op, error = %e, "injected fault");
                Err(e)
            }
            Some(Fault::Delay(d)) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_server(&self, state: &ClusterState, server: &str) -> Result<(), RpcError> {
        if !self.servers.iter().any(|s| s == server) || state.down.contains(server) {
            return Err(RpcError::ServerUnavailable {
                server: server.to_string(),
                message: "server is not running".into(),
            });
        }
        Ok(())
    }

    fn serve_open(&self, server: &str, req: OpenScanRequest) -> Result<ScanResponse, RpcError> {
        let mut state = self.state.lock();
        self.check_server(&state, server)?;
        let clock = state.clock;
        let table = state
            .tables
            .get(&req.table_id)
            .ok_or_else(|| RpcError::TableNotFound(req.table_id.clone()))?;
        let tablet_index = table
            .tablets
            .iter()
            .position(|t| t.location.tablet_id == req.tablet_id)
            .ok_or_else(|| RpcError::TabletNotFound {
                tablet: req.tablet_id.clone(),
                server: server.to_string(),
            })?;
        let tablet = &table.tablets[tablet_index];
        check_replica(&tablet.location, server, req.leader_only)?;

        let schema = &table.info.schema;
        let projection = resolve(schema, &ColumnSelection::Indexes(req.projection.clone()))
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
        let predicates = PredicateSet::from_encoded(schema, &req.predicates)
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;

        let partition = &tablet.location.partition;
        let next_key = match req.lower_bound {
            Some(lower) if lower > partition.start_key => lower,
            _ => partition.start_key.clone(),
        };
        let upper = match (req.upper_bound, partition.end_key.is_empty()) {
            (Some(u), false) => Some(u.min(partition.end_key.clone())),
            (Some(u), true) => Some(u),
            (None, false) => Some(partition.end_key.clone()),
            (None, true) => None,
        };
        let read_ts = match req.read_mode {
            ReadMode::Snapshot => Some(req.snapshot_timestamp.unwrap_or(clock)),
            ReadMode::ReadLatest => None,
        };

        let mut session = ServerScanner {
            server: server.to_string(),
            table_id: req.table_id.clone(),
            tablet_index,
            projection: projection.indexes().to_vec(),
            projection_schema: projection.schema().clone(),
            predicates,
            next_key,
            upper,
            read_ts,
            ordered: req.order_mode == OrderMode::Ordered,
            leader_only: req.leader_only,
            batch_size_bytes: req.batch_size_bytes,
            batch_size_rows: req.batch_size_rows,
            last_seq: 0,
            last_access: Instant::now(),
        };
        let batch = self.produce(tablet, &mut session)?;
        debug!(
            server,
            tablet = %req.tablet_id,
            read_ts = ?session.read_ts,
            has_more = batch.has_more,
            "opened scanner"
        );

        let handle = if batch.has_more {
            state.next_scanner += 1;
            let handle = format!("{server}-scanner-{}", state.next_scanner);
            state.scanners.insert(handle.clone(), session);
            Some(handle)
        } else {
            None
        };
        Ok(ScanResponse {
            handle,
            data: batch.data,
            has_more: batch.has_more,
            snapshot_timestamp: Some(read_ts.unwrap_or(clock)),
            last_primary_key: batch.last_key,
        })
    }

    fn serve_continue(
        &self,
        server: &str,
        req: ContinueScanRequest,
    ) -> Result<ScanResponse, RpcError> {
        let mut state = self.state.lock();
        self.check_server(&state, server)?;
        let ttl = self.config.scanner_ttl;

        let mut session = match state.scanners.remove(&req.handle) {
            Some(s) if s.server == server && s.last_access.elapsed() <= ttl => s,
            Some(s) if s.server != server => {
                state.scanners.insert(req.handle.clone(), s);
                return Err(RpcError::ScannerNotFound(req.handle));
            }
            _ => return Err(RpcError::ScannerNotFound(req.handle)),
        };
        if req.call_seq_id != session.last_seq + 1 {
            let expected = session.last_seq + 1;
            state.scanners.insert(req.handle.clone(), session);
            return Err(RpcError::InvalidRequest(format!(
                "call sequence id {} out of order, expected {expected}",
                req.call_seq_id
            )));
        }
        let tablet = state
            .tables
            .get(&session.table_id)
            .and_then(|t| t.tablets.get(session.tablet_index))
            .ok_or_else(|| RpcError::Internal("scanner refers to a dropped tablet".into()))?;
        if session.leader_only && tablet.location.leader().is_none_or(|l| l != server) {
            return Err(RpcError::NotLeader {
                tablet: tablet.location.tablet_id.clone(),
                server: server.to_string(),
            });
        }

        session.batch_size_bytes = req.batch_size_bytes;
        session.batch_size_rows = req.batch_size_rows;
        session.last_seq = req.call_seq_id;
        session.last_access = Instant::now();
        let batch = self.produce(tablet, &mut session)?;

        let handle = if batch.has_more {
            state.scanners.insert(req.handle.clone(), session);
            Some(req.handle)
        } else {
            None
        };
        Ok(ScanResponse {
            handle,
            data: batch.data,
            has_more: batch.has_more,
            snapshot_timestamp: None,
            last_primary_key: batch.last_key,
        })
    }

    /// Read the next batch of `session` from `tablet`, advancing its cursor.
    fn produce(&self, tablet: &TabletState, session: &mut ServerScanner) -> Result<Batch, RpcError> {
        let max_rows = session
            .batch_size_rows
            .unwrap_or(usize::MAX)
            .min(self.config.max_batch_rows)
            .max(1);
        let mut rows = Vec::new();
        let mut bytes = 0usize;
        let mut last_key = None;
        let mut has_more = false;

        let upper = match &session.upper {
            Some(u) if *u <= session.next_key => {
                return Ok(Batch {
                    data: encode_batch(&session.projection_schema, &rows)
                        .map_err(|e| RpcError::Internal(e.to_string()))?,
                    last_key: None,
                    has_more: false,
                });
            }
            Some(u) => Bound::Excluded(u.clone()),
            None => Bound::Unbounded,
        };
        let range = (Bound::Included(session.next_key.clone()), upper);
        for (key, versions) in tablet.rows.range(range) {
            if !rows.is_empty() && (rows.len() >= max_rows || bytes >= session.batch_size_bytes) {
                has_more = true;
                session.next_key = key.clone();
                break;
            }
            session.next_key = successor(key);
            let visible = versions
                .iter()
                .rev()
                .find(|v| session.read_ts.is_none_or(|ts| v.write_ts <= ts));
            let Some(version) = visible else {
                continue;
            };
            if !session.predicates.evaluate_row(&version.row) {
                continue;
            }
            let projected: Vec<Value> = session
                .projection
                .iter()
                .map(|&i| version.row[i].clone())
                .collect();
            bytes += row_size(&session.projection_schema, &projected);
            rows.push(projected);
            last_key = Some(key.clone());
        }

        let data = encode_batch(&session.projection_schema, &rows)
            .map_err(|e| RpcError::Internal(e.to_string()))?;
        Ok(Batch {
            data,
            last_key: last_key.filter(|_| session.ordered),
            has_more,
        })
    }
}

#[async_trait]
impl TabletLocator for MiniCluster {
    async fn lookup_table(&self, name: &str) -> Result<TableInfo, RpcError> {
        let state = self.state.lock();
        state
            .names
            .get(name)
            .and_then(|id| state.tables.get(id))
            .map(|t| t.info.clone())
            .ok_or_else(|| RpcError::TableNotFound(name.to_string()))
    }

    async fn locate_tablet(&self, table_id: &str, key: &[u8]) -> Result<TabletLocation, RpcError> {
        let state = self.state.lock();
        let table = state
            .tables
            .get(table_id)
            .ok_or_else(|| RpcError::TableNotFound(table_id.to_string()))?;
        let index = table
            .tablet_for(key)
            .ok_or_else(|| RpcError::Internal("no tablet covers key".into()))?;
        Ok(table.tablets[index].location.clone())
    }

    async fn invalidate(&self, tablet_id: &str) {
        debug!(tablet = tablet_id, "location invalidated");
    }
}

#[async_trait]
impl TabletTransport for MiniCluster {
    async fn open_scan(
        &self,
        server: &str,
        req: OpenScanRequest,
    ) -> Result<ScanResponse, RpcError> {
        self.apply_fault(ScanOp::Open).await?;
        self.serve_open(server, req)
    }

    async fn continue_scan(
        &self,
        server: &str,
        req: ContinueScanRequest,
    ) -> Result<ScanResponse, RpcError> {
        self.apply_fault(ScanOp::Continue).await?;
        self.serve_continue(server, req)
    }

    async fn close_scan(&self, server: &str, handle: &str) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        self.check_server(&state, server)?;
        if state.scanners.remove(handle).is_some() {
            debug!(server, handle, "closed scanner");
        }
        Ok(())
    }

    async fn keep_alive(&self, server: &str, handle: &str) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        self.check_server(&state, server)?;
        match state.scanners.get_mut(handle) {
            Some(s) if s.server == server => {
                s.last_access = Instant::now();
                Ok(())
            }
            _ => Err(RpcError::ScannerNotFound(handle.to_string())),
        }
    }
}

/// Row `i` of the demo table.
pub fn demo_row(i: i32) -> Vec<Value> {
    vec![
        Value::Int32(i),
        Value::Int32(i * 2),
        Value::String(format!("hello_{i}")),
    ]
}

fn check_row(schema: &Schema, row: Vec<Value>) -> Result<Vec<Value>, RpcError> {
    if row.len() != schema.column_count() {
        return Err(RpcError::InvalidRequest(format!(
            "row has {} values, table has {} columns",
            row.len(),
            schema.column_count()
        )));
    }
    schema
        .columns()
        .iter()
        .zip(row)
        .map(|(col, value)| {
            if value.is_null() {
                return if col.nullable {
                    Ok(Value::Null)
                } else {
                    Err(RpcError::InvalidRequest(format!("column '{}' is not nullable", col.name)))
                };
            }
            value.coerce_to(col.data_type).ok_or_else(|| {
                RpcError::InvalidRequest(format!(
                    "column '{}' expects {}, got {}",
                    col.name,
                    col.data_type,
                    value.type_name()
                ))
            })
        })
        .collect()
}

fn check_replica(location: &TabletLocation, server: &str, leader_only: bool) -> Result<(), RpcError> {
    let replica = location
        .replicas
        .iter()
        .find(|r| r.server == server)
        .ok_or_else(|| RpcError::TabletNotFound {
            tablet: location.tablet_id.clone(),
            server: server.to_string(),
        })?;
    if leader_only && replica.role != ReplicaRole::Leader {
        return Err(RpcError::NotLeader {
            tablet: location.tablet_id.clone(),
            server: server.to_string(),
        });
    }
    Ok(())
}

/// Make the replica after the current leader (skipping `down` servers) the
/// new leader.
fn elect_next_leader(location: &mut TabletLocation, down: &HashSet<ServerId>) {
    let n = location.replicas.len();
    let Some(current) = location
        .replicas
        .iter()
        .position(|r| r.role == ReplicaRole::Leader)
    else {
        return;
    };
    let next = (1..n)
        .map(|step| (current + step) % n)
        .find(|&i| !down.contains(&location.replicas[i].server));
    if let Some(next) = next {
        location.replicas[current].role = ReplicaRole::Follower;
        location.replicas[next].role = ReplicaRole::Leader;
    }
}

fn row_size(schema: &Schema, row: &[Value]) -> usize {
    schema
        .columns()
        .iter()
        .zip(row)
        .map(|(col, value)| match value {
            Value::String(s) => s.len() + 4,
            Value::Binary(b) => b.len() + 4,
            _ => col.data_type.fixed_width().unwrap_or(0),
        })
        .sum()
}
