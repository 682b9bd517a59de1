//! Scanner tests against a scripted in-process transport.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;
use crate::batch::encode_batch;
use crate::client::{ScanClient, Table};
use crate::config::{RetryPolicy, ScanConfig};
use crate::encoding::encode_key_prefix;
use crate::error::ErrorKind;
use crate::rpc::{Partition, ReplicaInfo, ReplicaRole, TableInfo, TabletLocator, TabletTransport};
use crate::schema::ColumnSchema;
use crate::types::{DataType, OrderMode};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub(crate) fn fixture_schema() -> Schema {
    Schema::builder()
        .add_column(ColumnSchema::new("key", DataType::Int32).not_null())
        .add_column(ColumnSchema::new("int_val", DataType::Int32))
        .add_column(ColumnSchema::new("string_val", DataType::String))
        .set_primary_keys(&["key"])
        .build()
        .unwrap()
}

pub(crate) fn fixture_table() -> Arc<TableInfo> {
    table_with_id("tbl-1")
}

pub(crate) fn table_with_id(id: &str) -> Arc<TableInfo> {
    Arc::new(TableInfo {
        id: id.into(),
        name: "scan_test".into(),
        schema: Arc::new(fixture_schema()),
    })
}

pub(crate) fn key(k: i32) -> Vec<u8> {
    encode_key_prefix(&fixture_schema(), &[Value::Int32(k)]).unwrap()
}

/// Two tablets split at key 50: `t-0` led by ts-1, `t-1` led by ts-2.
fn tablets() -> Vec<TabletLocation> {
    let replicas = |leader: &str, follower: &str| {
        vec![
            ReplicaInfo {
                server: leader.into(),
                role: ReplicaRole::Leader,
            },
            ReplicaInfo {
                server: follower.into(),
                role: ReplicaRole::Follower,
            },
        ]
    };
    vec![
        TabletLocation {
            tablet_id: "t-0".into(),
            partition: Partition {
                start_key: vec![],
                end_key: key(50),
            },
            replicas: replicas("ts-1", "ts-2"),
        },
        TabletLocation {
            tablet_id: "t-1".into(),
            partition: Partition {
                start_key: key(50),
                end_key: vec![],
            },
            replicas: replicas("ts-2", "ts-1"),
        },
    ]
}

pub(crate) struct FakeLocator {
    table: Mutex<Arc<TableInfo>>,
    tablets: Vec<TabletLocation>,
    pub(crate) invalidated: Mutex<Vec<String>>,
}

#[async_trait]
impl TabletLocator for FakeLocator {
    async fn lookup_table(&self, name: &str) -> std::result::Result<TableInfo, RpcError> {
        let table = self.table.lock().clone();
        if name != table.name {
            return Err(RpcError::TableNotFound(name.into()));
        }
        Ok(table.as_ref().clone())
    }

    async fn locate_tablet(
        &self,
        table_id: &str,
        key: &[u8],
    ) -> std::result::Result<TabletLocation, RpcError> {
        if table_id != self.table.lock().id {
            return Err(RpcError::TableNotFound(table_id.into()));
        }
        self.tablets
            .iter()
            .find(|t| t.partition.contains(key))
            .cloned()
            .ok_or_else(|| RpcError::Internal("no tablet".into()))
    }

    async fn invalidate(&self, tablet_id: &str) {
        self.invalidated.lock().push(tablet_id.to_string());
    }
}

impl FakeLocator {
    /// Swap the table served under its name, as if it had been recreated.
    pub(crate) fn replace_table(&self, table: Arc<TableInfo>) {
        *self.table.lock() = table;
    }
}

pub(crate) enum Step {
    Reply(std::result::Result<ScanResponse, RpcError>),
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) enum Call {
    Open(ServerId, OpenScanRequest),
    Continue(ServerId, ContinueScanRequest),
    Close(ServerId, String),
    KeepAlive(ServerId, String),
}

/// Answers open and continue calls from a script, in order.
#[derive(Default)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<Step>>,
    pub(crate) calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
    pub(crate) fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    async fn next_step(&self) -> std::result::Result<ScanResponse, RpcError> {
        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RpcError::Internal("hung".into()))
            }
            None => Err(RpcError::Internal("unscripted call".into())),
        }
    }

    pub(crate) fn opens(&self) -> Vec<(ServerId, OpenScanRequest)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Open(s, r) => Some((s.clone(), r.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn continues(&self) -> Vec<(ServerId, ContinueScanRequest)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Continue(s, r) => Some((s.clone(), r.clone())),
                _ => None,
            })
            .collect()
    }

    fn scan_rpcs(&self) -> usize {
        self.opens().len() + self.continues().len()
    }
}

#[async_trait]
impl TabletTransport for FakeTransport {
    async fn open_scan(
        &self,
        server: &str,
        req: OpenScanRequest,
    ) -> std::result::Result<ScanResponse, RpcError> {
        self.calls.lock().push(Call::Open(server.into(), req));
        self.next_step().await
    }

    async fn continue_scan(
        &self,
        server: &str,
        req: ContinueScanRequest,
    ) -> std::result::Result<ScanResponse, RpcError> {
        self.calls.lock().push(Call::Continue(server.into(), req));
        self.next_step().await
    }

    async fn close_scan(&self, server: &str, handle: &str) -> std::result::Result<(), RpcError> {
        self.calls.lock().push(Call::Close(server.into(), handle.into()));
        Ok(())
    }

    async fn keep_alive(&self, server: &str, handle: &str) -> std::result::Result<(), RpcError> {
        self.calls
            .lock()
            .push(Call::KeepAlive(server.into(), handle.into()));
        Ok(())
    }
}

pub(crate) struct Harness {
    pub(crate) client: ScanClient,
    pub(crate) transport: Arc<FakeTransport>,
    pub(crate) locator: Arc<FakeLocator>,
    pub(crate) table: Table,
}

pub(crate) fn harness_for(table: Arc<TableInfo>, steps: Vec<Step>) -> Harness {
    let locator = Arc::new(FakeLocator {
        table: Mutex::new(table.clone()),
        tablets: tablets(),
        invalidated: Mutex::new(Vec::new()),
    });
    let transport = Arc::new(FakeTransport {
        script: Mutex::new(steps.into()),
        calls: Mutex::new(Vec::new()),
    });
    let config = ScanConfig::default()
        .with_retry(RetryPolicy::immediate(3))
        .with_close_timeout(Duration::from_millis(100));
    let client = ScanClient::with_config(locator.clone(), transport.clone(), config);
    let table = Table::from_info(client.clone(), table);
    Harness {
        client,
        transport,
        locator,
        table,
    }
}

pub(crate) fn harness(steps: Vec<Step>) -> Harness {
    harness_for(fixture_table(), steps)
}

pub(crate) fn fixture_client() -> ScanClient {
    harness(Vec::new()).client
}

fn row(k: i32) -> Vec<Value> {
    vec![
        Value::Int32(k),
        Value::Int32(k * 2),
        Value::String(format!("hello_{k}")),
    ]
}

/// A reply carrying rows `keys`, with the key of the last row attached.
pub(crate) fn reply(keys: &[i32], handle: Option<&str>) -> Step {
    let rows: Vec<Vec<Value>> = keys.iter().map(|&k| row(k)).collect();
    Step::Reply(Ok(ScanResponse {
        handle: handle.map(String::from),
        data: encode_batch(&fixture_schema(), &rows).unwrap(),
        has_more: handle.is_some(),
        snapshot_timestamp: Some(100),
        last_primary_key: keys.last().map(|&k| key(k)),
    }))
}

fn fail(err: RpcError) -> Step {
    Step::Reply(Err(err))
}

fn keys_of(rows: &[Row]) -> Vec<i32> {
    rows.iter()
        .map(|r| match r[0] {
            Value::Int32(k) => k,
            ref other => panic!("unexpected key {other:?}"),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_contradictory_predicates_issue_no_rpcs() {
    let h = harness(Vec::new());
    let mut scanner = h
        .table
        .scanner()
        .add_predicate(h.table.column("key").unwrap().gt(30).unwrap())
        .add_predicate(h.table.column("key").unwrap().lt(10).unwrap())
        .open()
        .await
        .unwrap();
    assert_eq!(scanner.state(), ScanState::Exhausted);
    assert!(!scanner.has_more_rows());
    assert!(scanner.next_batch().await.unwrap().is_empty());
    assert!(scanner.read_all_tuples().await.unwrap().is_empty());
    assert!(h.transport.calls.lock().is_empty());
}

#[tokio::test]
async fn test_open_twice_fails() {
    let h = harness(vec![reply(&[1, 2], None), reply(&[], None)]);
    let descriptor = h.table.scanner().build().unwrap();
    let mut scanner = Scanner::new(h.client.clone(), descriptor);
    scanner.open().await.unwrap();
    assert_eq!(scanner.state(), ScanState::BatchReady);
    assert_eq!(
        scanner.open().await.unwrap_err(),
        Error::Scan(ScanError::AlreadyOpened)
    );
}

#[tokio::test]
async fn test_read_before_open_and_after_close() {
    let h = harness(vec![reply(&[1], Some("h1"))]);
    let descriptor = h.table.scanner().build().unwrap();
    let mut scanner = Scanner::new(h.client.clone(), descriptor);
    assert_eq!(
        scanner.next_batch().await.unwrap_err(),
        Error::Scan(ScanError::NotOpen)
    );

    scanner.open().await.unwrap();
    scanner.close().await;
    assert_eq!(scanner.state(), ScanState::Closed);
    assert_eq!(
        scanner.next_batch().await.unwrap_err(),
        Error::Scan(ScanError::Closed)
    );
    assert!(matches!(
        h.transport.calls.lock().last(),
        Some(Call::Close(server, handle)) if server == "ts-1" && handle == "h1"
    ));
}

#[tokio::test]
async fn test_walks_tablets_in_key_order() {
    let h = harness(vec![
        reply(&[1, 2], Some("h1")),
        reply(&[3], None),
        reply(&[60, 61], None),
    ]);
    let mut scanner = h
        .table
        .scanner()
        .set_read_mode(ReadMode::Snapshot)
        .open()
        .await
        .unwrap();
    let rows = scanner.read_all_tuples().await.unwrap();
    assert_eq!(keys_of(&rows), vec![1, 2, 3, 60, 61]);
    assert_eq!(scanner.state(), ScanState::Exhausted);
    assert_eq!(scanner.snapshot_timestamp(), Some(100));
    assert_eq!(scanner.last_primary_key(), Some(key(61).as_slice()));

    let opens = h.transport.opens();
    assert_eq!(opens.len(), 2);
    assert_eq!(opens[0].0, "ts-1");
    assert_eq!(opens[0].1.lower_bound, None);
    assert_eq!(opens[0].1.upper_bound, Some(key(50)));
    assert_eq!(opens[0].1.snapshot_timestamp, None);
    assert_eq!(opens[1].0, "ts-2");
    assert_eq!(opens[1].1.lower_bound, Some(key(50)));
    assert_eq!(opens[1].1.upper_bound, None);
    // The second tablet reads at the timestamp pinned by the first.
    assert_eq!(opens[1].1.snapshot_timestamp, Some(100));

    let continues = h.transport.continues();
    assert_eq!(continues.len(), 1);
    assert_eq!(continues[0].1.handle, "h1");
    assert_eq!(continues[0].1.call_seq_id, 1);

    let stats = scanner.stats();
    assert_eq!(stats.rpcs, 3);
    assert_eq!(stats.tablets_opened, 2);
    assert_eq!(stats.rows, 5);
    assert_eq!(stats.batches, 3);
}

#[tokio::test]
async fn test_empty_batches_are_skipped() {
    let h = harness(vec![
        reply(&[], Some("h1")),
        reply(&[], Some("h1")),
        reply(&[7], None),
        reply(&[], None),
    ]);
    let mut scanner = h.table.scanner().open().await.unwrap();
    assert_eq!(scanner.state(), ScanState::Open);

    let batch = scanner.next_batch().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.get(0, 2), Some(&Value::String("hello_7".into())));

    let last = scanner.next_batch().await.unwrap();
    assert!(last.is_empty());
    assert_eq!(scanner.state(), ScanState::Exhausted);
    assert_eq!(scanner.stats().batches, 1);
}

#[tokio::test]
async fn test_read_latest_omits_snapshot_timestamp() {
    let h = harness(vec![reply(&[51], None)]);
    let mut scanner = h
        .table
        .scanner()
        .add_predicate(h.table.column("key").unwrap().ge(50).unwrap())
        .open()
        .await
        .unwrap();
    assert_eq!(keys_of(&scanner.read_all_tuples().await.unwrap()), vec![51]);
    let opens = h.transport.opens();
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].1.tablet_id, "t-1");
    assert_eq!(opens[0].1.snapshot_timestamp, None);
    assert_eq!(opens[0].1.predicates.len(), 1);
    assert_eq!(scanner.snapshot_timestamp(), None);
}

#[tokio::test]
async fn test_keep_alive_targets_current_handle() {
    let h = harness(vec![reply(&[1], Some("h1"))]);
    let mut scanner = h.table.scanner().open().await.unwrap();
    scanner.keep_alive().await.unwrap();
    assert!(matches!(
        h.transport.calls.lock().last(),
        Some(Call::KeepAlive(server, handle)) if server == "ts-1" && handle == "h1"
    ));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_expired_scanner_surfaces_without_fault_tolerance() {
    let h = harness(vec![
        reply(&[1], Some("h1")),
        fail(RpcError::ScannerNotFound("h1".into())),
    ]);
    let mut scanner = h.table.scanner().open().await.unwrap();
    assert_eq!(scanner.next_batch().await.unwrap().len(), 1);

    let err = scanner.next_batch().await.unwrap_err();
    assert_eq!(err, Error::Scan(ScanError::ScanExpired("h1".into())));
    assert_eq!(err.kind(), ErrorKind::ScanExpired);
    assert_eq!(scanner.state(), ScanState::Failed);

    let rpcs = h.transport.scan_rpcs();
    assert_eq!(scanner.next_batch().await.unwrap_err(), err);
    assert_eq!(h.transport.scan_rpcs(), rpcs);
}

#[tokio::test]
async fn test_fault_tolerant_scan_resumes_after_last_key() {
    let h = harness(vec![
        reply(&[1, 2], Some("h1")),
        fail(RpcError::NotLeader {
            tablet: "t-0".into(),
            server: "ts-1".into(),
        }),
        reply(&[3], None),
        reply(&[], None),
    ]);
    let mut scanner = h.table.scanner().set_fault_tolerant().open().await.unwrap();
    assert_eq!(scanner.descriptor().order_mode(), OrderMode::Ordered);

    let rows = scanner.read_all_tuples().await.unwrap();
    assert_eq!(keys_of(&rows), vec![1, 2, 3]);

    let opens = h.transport.opens();
    assert_eq!(opens.len(), 3);
    let reopen = &opens[1].1;
    assert_eq!(reopen.tablet_id, "t-0");
    assert_eq!(reopen.lower_bound, Some(successor(&key(2))));
    assert_eq!(reopen.upper_bound, Some(key(50)));
    assert_eq!(reopen.snapshot_timestamp, Some(100));
    assert_eq!(reopen.read_mode, ReadMode::Snapshot);
    assert_eq!(reopen.order_mode, OrderMode::Ordered);

    assert_eq!(h.locator.invalidated.lock().as_slice(), ["t-0".to_string()]);
    assert_eq!(scanner.stats().retries, 1);
}

#[tokio::test]
async fn test_fault_tolerant_scan_avoids_failed_server() {
    let h = harness(vec![
        reply(&[1], Some("h1")),
        fail(RpcError::ServerUnavailable {
            server: "ts-1".into(),
            message: "crashed".into(),
        }),
        reply(&[2], None),
        reply(&[], None),
    ]);
    let mut scanner = h
        .table
        .scanner()
        .set_fault_tolerant()
        .set_replica_selection(ReplicaSelection::AnyReplica)
        .open()
        .await
        .unwrap();
    let rows = scanner.read_all_tuples().await.unwrap();
    assert_eq!(keys_of(&rows), vec![1, 2]);

    let opens = h.transport.opens();
    assert_eq!(opens[1].0, "ts-2");
    assert_eq!(opens[1].1.lower_bound, Some(successor(&key(1))));
    assert!(!opens[1].1.leader_only);
    // The second tablet is still read, from a server that has not failed.
    assert_eq!(opens[2].0, "ts-2");
}

#[tokio::test]
async fn test_fault_tolerant_scan_requires_resume_key() {
    let h = harness(vec![Step::Reply(Ok(ScanResponse {
        handle: Some("h1".into()),
        data: encode_batch(&fixture_schema(), &[row(1)]).unwrap(),
        has_more: true,
        snapshot_timestamp: Some(100),
        last_primary_key: None,
    }))]);
    let err = h
        .table
        .scanner()
        .set_fault_tolerant()
        .open()
        .await
        .unwrap_err();
    assert_eq!(err, Error::Scan(ScanError::CannotResume("t-0".into())));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(
        h.transport.calls.lock().last(),
        Some(Call::Close(_, handle)) if handle == "h1"
    ));
}

#[tokio::test]
async fn test_open_gives_up_after_max_attempts() {
    let not_leader = || {
        fail(RpcError::NotLeader {
            tablet: "t-0".into(),
            server: "ts-1".into(),
        })
    };
    let h = harness(vec![not_leader(), not_leader(), not_leader()]);
    let err = h.table.scanner().open().await.unwrap_err();
    assert!(matches!(
        &err,
        Error::Scan(ScanError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(err.kind(), ErrorKind::LeaderChanged);
    assert_eq!(h.transport.opens().len(), 3);
}

#[tokio::test]
async fn test_non_retriable_open_error_fails_immediately() {
    let h = harness(vec![fail(RpcError::InvalidRequest("bad projection".into()))]);
    let err = h.table.scanner().open().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(h.transport.opens().len(), 1);
}

#[tokio::test]
async fn test_continue_timeout_surfaces_without_fault_tolerance() {
    let h = harness(vec![reply(&[1], Some("h1")), Step::Hang]);
    let mut scanner = h
        .table
        .scanner()
        .set_timeout(Duration::from_millis(20))
        .open()
        .await
        .unwrap();
    scanner.next_batch().await.unwrap();
    let err = scanner.next_batch().await.unwrap_err();
    assert_eq!(err, Error::Scan(ScanError::Timeout(Duration::from_millis(20))));
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_rpc() {
    let h = harness(vec![Step::Hang]);
    let descriptor = h.table.scanner().build().unwrap();
    let mut scanner = Scanner::new(h.client.clone(), descriptor);
    let canceller = scanner.canceller();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let err = scanner.open().await.unwrap_err();
    assert_eq!(err, Error::Scan(ScanError::Cancelled));
    assert_eq!(scanner.state(), ScanState::Failed);
}

#[tokio::test]
async fn test_invalid_descriptor_rejected_before_rpc() {
    let h = harness(Vec::new());
    let mut descriptor = h.table.scanner().build().unwrap();
    descriptor.batch_size_bytes = 0;
    let mut scanner = Scanner::new(h.client.clone(), descriptor);
    assert!(matches!(
        scanner.open().await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(h.transport.calls.lock().is_empty());
}

#[tokio::test]
async fn test_huge_timeout_saturates_on_the_wire() {
    let h = harness(vec![reply(&[1], None)]);
    let mut scanner = h
        .table
        .scanner()
        .set_timeout(Duration::from_secs(u64::MAX))
        .open()
        .await
        .unwrap();
    assert_eq!(keys_of(&scanner.read_all_tuples().await.unwrap()), vec![1]);
    assert_eq!(h.transport.opens()[0].1.timeout_ms, u64::MAX);
}

#[tokio::test]
async fn test_batch_over_row_limit_is_rejected() {
    let h = harness(vec![reply(&[1, 2, 3], Some("h1"))]);
    let err = h
        .table
        .scanner()
        .set_batch_size_rows(2)
        .open()
        .await
        .err()
        .unwrap();
    assert_eq!(
        err,
        Error::Decode(crate::error::DecodeError::TooManyRows { rows: 3, limit: 2 })
    );
}
