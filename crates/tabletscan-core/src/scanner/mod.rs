//! The scanner state machine.
//!
//! A [`Scanner`] walks the tablets covering a descriptor's effective key
//! range in key order, issuing one open-scan RPC per tablet and continue-scan
//! RPCs until the tablet is drained. Only one RPC is outstanding at a time.
//!
//! Fault-tolerant scans are ordered snapshot scans. The scanner remembers the
//! primary key of the last row it delivered; when a tablet server fails
//! mid-scan it re-resolves the tablet, avoids the failed server, and reopens
//! at the successor of that key, pinned to the same snapshot timestamp. No row
//! is delivered twice or skipped.

mod retry;
mod state;

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use state::{ScanState, ScanStats};

use crate::batch::{Row, RowBatch, decode_batch_limited};
use crate::bound::KeyRange;
use crate::client::ScanClient;
use crate::descriptor::ScanDescriptor;
use crate::encoding::successor;
use crate::error::{Error, Result, RpcError, ScanError};
use crate::rpc::{ContinueScanRequest, OpenScanRequest, ScanResponse, TabletLocation};
use crate::schema::Schema;
use crate::types::{ReadMode, ReplicaSelection, ServerId, TabletId};

/// The tablet currently being read.
#[derive(Debug)]
struct TabletCursor {
    location: TabletLocation,
    server: ServerId,
    /// Server-side scanner handle; `None` once the tablet is drained.
    handle: Option<String>,
    call_seq_id: u64,
}

/// Aborts a scanner's in-flight RPC from another task.
#[derive(Debug, Clone)]
pub struct ScanCanceller(CancellationToken);

impl ScanCanceller {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A single execution of a [`ScanDescriptor`].
///
/// Created `Closed`; [`open`](Self::open) may be called once. Batches are
/// pulled with [`next_batch`](Self::next_batch) while
/// [`has_more_rows`](Self::has_more_rows) is true.
#[derive(Debug)]
pub struct Scanner {
    client: ScanClient,
    descriptor: ScanDescriptor,
    state: ScanState,
    opened: bool,
    range: KeyRange,
    cursor: Option<TabletCursor>,
    /// Key locating the next tablet to open once the current one is drained.
    next_tablet_key: Option<Vec<u8>>,
    pending: Option<RowBatch>,
    last_primary_key: Option<Vec<u8>>,
    snapshot_timestamp: Option<u64>,
    blacklist: HashSet<ServerId>,
    /// Tablet and server of the most recent RPC, for failure handling.
    last_target: Option<(TabletId, ServerId)>,
    failure: Option<Error>,
    cancel: CancellationToken,
    stats: ScanStats,
}

impl Scanner {
    pub fn new(client: ScanClient, descriptor: ScanDescriptor) -> Self {
        let snapshot_timestamp = descriptor.snapshot_timestamp;
        Self {
            client,
            descriptor,
            state: ScanState::Closed,
            opened: false,
            range: KeyRange::all(),
            cursor: None,
            next_tablet_key: None,
            pending: None,
            last_primary_key: None,
            snapshot_timestamp,
            blacklist: HashSet::new(),
            last_target: None,
            failure: None,
            cancel: CancellationToken::new(),
            stats: ScanStats::default(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn descriptor(&self) -> &ScanDescriptor {
        &self.descriptor
    }

    /// Schema of the rows this scanner returns.
    pub fn projection_schema(&self) -> &Arc<Schema> {
        self.descriptor.projection_schema()
    }

    /// The timestamp a snapshot scan reads at, once known.
    pub fn snapshot_timestamp(&self) -> Option<u64> {
        self.snapshot_timestamp
    }

    /// Encoded primary key of the last row delivered, when rows carry keys.
    pub fn last_primary_key(&self) -> Option<&[u8]> {
        self.last_primary_key.as_deref()
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn canceller(&self) -> ScanCanceller {
        ScanCanceller(self.cancel.clone())
    }

    /// Whether another call to `next_batch` may return rows.
    pub fn has_more_rows(&self) -> bool {
        matches!(self.state, ScanState::Open | ScanState::BatchReady)
    }

    /// Validate the descriptor and open the first tablet in range.
    ///
    /// Validation errors are returned before any RPC. A scan whose
    /// predicates or bounds can match nothing is exhausted immediately.
    pub async fn open(&mut self) -> Result<()> {
        if self.opened {
            return Err(ScanError::AlreadyOpened.into());
        }
        self.opened = true;
        self.state = ScanState::Opening;
        match self.try_open().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn try_open(&mut self) -> Result<()> {
        self.descriptor.validate()?;
        self.range = self.descriptor.effective_range()?;
        if self.descriptor.predicates().matches_nothing() || self.range.is_empty() {
            debug!(table = %self.descriptor.table().name, "scan matches no rows");
            self.state = ScanState::Exhausted;
            return Ok(());
        }
        info!(
            table = %self.descriptor.table().name,
            fault_tolerant = self.descriptor.is_fault_tolerant(),
            predicates = self.descriptor.predicates().len(),
            "opening scan"
        );
        let start = self.range.lower.clone().unwrap_or_default();
        let batch = self.open_tablet(start, 0).await?;
        if batch.is_empty() {
            self.state = self.settled_state();
        } else {
            self.pending = Some(batch);
            self.state = ScanState::BatchReady;
        }
        Ok(())
    }

    /// Return the next non-empty batch, crossing tablets as needed. Returns an
    /// empty batch once the scan is exhausted.
    pub async fn next_batch(&mut self) -> Result<RowBatch> {
        self.check_readable()?;
        if self.state == ScanState::Exhausted {
            return Ok(RowBatch::empty(self.projection_schema().clone()));
        }
        if let Some(batch) = self.pending.take() {
            self.state = self.settled_state();
            return Ok(self.deliver(batch));
        }
        loop {
            let batch = match self.fetch().await {
                Ok(batch) => batch,
                Err(e) => return Err(self.fail(e)),
            };
            self.state = self.settled_state();
            if !batch.is_empty() {
                return Ok(self.deliver(batch));
            }
            if self.state == ScanState::Exhausted {
                return Ok(batch);
            }
        }
    }

    /// Drain the scan into memory. Every remaining row is held at once, so
    /// this is only suitable for small results.
    pub async fn read_all_tuples(&mut self) -> Result<Vec<Row>> {
        self.check_readable()?;
        let mut rows = Vec::new();
        while self.has_more_rows() {
            rows.extend(self.next_batch().await?.as_tuples());
        }
        Ok(rows)
    }

    /// Keep the current server-side scanner from expiring.
    pub async fn keep_alive(&mut self) -> Result<()> {
        self.check_readable()?;
        let Some((server, handle)) = self.current_handle() else {
            return Ok(());
        };
        let transport = self.client.transport().clone();
        let timeout = self.descriptor.timeout();
        retry::bounded(&self.cancel, timeout, transport.keep_alive(&server, &handle))
            .await
            .map_err(retry::surface_continue_error)
    }

    /// Release the server-side scanner, waiting at most the configured close
    /// timeout. Failures are logged, not returned.
    pub async fn close(&mut self) {
        self.pending = None;
        self.next_tablet_key = None;
        if let Some((server, handle)) = self.current_handle() {
            let transport = self.client.transport().clone();
            let timeout = self.client.config().close_timeout;
            match tokio::time::timeout(timeout, transport.close_scan(&server, &handle)).await {
                Ok(Ok(())) => debug!(server = %server, handle = %handle, "scanner closed"),
                Ok(Err(e)) => debug!(server = %server, error = %e, "close_scan failed"),
                Err(_) => debug!(server = %server, "close_scan timed out"),
            }
        }
        self.cursor = None;
        self.opened = true;
        self.state = ScanState::Closed;
    }

    fn check_readable(&self) -> Result<()> {
        match self.state {
            ScanState::Closed | ScanState::Opening if !self.opened => Err(ScanError::NotOpen.into()),
            ScanState::Closed | ScanState::Opening => Err(ScanError::Closed.into()),
            ScanState::Failed => Err(self
                .failure
                .clone()
                .unwrap_or_else(|| ScanError::Closed.into())),
            ScanState::Open | ScanState::BatchReady | ScanState::Exhausted => Ok(()),
        }
    }

    fn current_handle(&self) -> Option<(ServerId, String)> {
        let cursor = self.cursor.as_ref()?;
        Some((cursor.server.clone(), cursor.handle.clone()?))
    }

    fn more_available(&self) -> bool {
        self.cursor.as_ref().is_some_and(|c| c.handle.is_some()) || self.next_tablet_key.is_some()
    }

    fn settled_state(&self) -> ScanState {
        if self.more_available() {
            ScanState::Open
        } else {
            ScanState::Exhausted
        }
    }

    fn deliver(&mut self, batch: RowBatch) -> RowBatch {
        self.stats.batches += 1;
        self.stats.rows += batch.len() as u64;
        batch
    }

    fn fail(&mut self, err: Error) -> Error {
        warn!(table = %self.descriptor.table().name, error = %err, "scan failed");
        self.state = ScanState::Failed;
        self.failure = Some(err.clone());
        self.pending = None;
        self.next_tablet_key = None;
        if let Some((server, handle)) = self.current_handle() {
            self.release_in_background(server, handle);
        }
        self.cursor = None;
        err
    }

    /// Close a server-side scanner without waiting for the result.
    fn release_in_background(&self, server: ServerId, handle: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let transport = self.client.transport().clone();
        let timeout = self.client.config().close_timeout;
        runtime.spawn(async move {
            match tokio::time::timeout(timeout, transport.close_scan(&server, &handle)).await {
                Ok(Ok(())) => debug!(server = %server, handle = %handle, "released scanner"),
                Ok(Err(e)) => debug!(server = %server, error = %e, "release failed"),
                Err(_) => debug!(server = %server, "release timed out"),
            }
        });
    }

    /// One step: continue the current tablet or open the next one.
    async fn fetch(&mut self) -> Result<RowBatch> {
        if self.cursor.as_ref().is_some_and(|c| c.handle.is_some()) {
            return self.continue_tablet().await;
        }
        match self.next_tablet_key.take() {
            Some(key) => self.open_tablet(key, 0).await,
            None => Ok(RowBatch::empty(self.projection_schema().clone())),
        }
    }

    /// The key range still to be read. Fault-tolerant scans skip everything
    /// up to and including the last delivered key.
    fn remaining_range(&self) -> KeyRange {
        match (&self.last_primary_key, self.descriptor.is_fault_tolerant()) {
            (Some(last), true) => self.range.resume_after(last),
            _ => self.range.clone(),
        }
    }

    fn pick_server(&self, loc: &TabletLocation) -> Option<ServerId> {
        let usable = |s: &&ServerId| !self.blacklist.contains(*s);
        match self.descriptor.replica_selection() {
            ReplicaSelection::LeaderOnly => loc.leader().filter(usable).cloned(),
            ReplicaSelection::AnyReplica => loc
                .replicas
                .iter()
                .map(|r| &r.server)
                .find(usable)
                .cloned(),
        }
    }

    /// Open the tablet containing `key`, retrying retriable failures.
    /// `attempt` counts attempts already spent on this tablet.
    async fn open_tablet(&mut self, mut key: Vec<u8>, mut attempt: u32) -> Result<RowBatch> {
        let policy = self.client.config().retry.clone();
        let mut last_err: Option<Error> = None;
        loop {
            if attempt >= policy.max_attempts {
                let last = last_err.unwrap_or_else(|| {
                    RpcError::Internal("no attempts permitted".to_string()).into()
                });
                return Err(ScanError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(last),
                }
                .into());
            }
            if attempt > 0 {
                self.stats.retries += 1;
                retry::backoff_sleep(&self.cancel, policy.backoff(attempt)).await?;
            }
            attempt += 1;

            match self.try_open_tablet(&key).await {
                Ok(Some(batch)) => return Ok(batch),
                Ok(None) => match self.next_tablet_key.take() {
                    Some(next) => {
                        key = next;
                        attempt = 0;
                        last_err = None;
                    }
                    None => return Ok(RowBatch::empty(self.projection_schema().clone())),
                },
                Err(e) if retry::is_retriable(&e) => {
                    warn!(attempt, error = %e, "open_scan failed; retrying");
                    self.handle_retriable(&e).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns `None` when the located tablet holds nothing of the remaining
    /// range; `next_tablet_key` is then set to the following tablet, if any.
    async fn try_open_tablet(&mut self, key: &[u8]) -> Result<Option<RowBatch>> {
        self.last_target = None;
        let table_id = self.descriptor.table().id.clone();
        let loc = self.client.locator().locate_tablet(&table_id, key).await?;

        let tablet_range = self.remaining_range().intersect(&loc.partition.key_range());
        if tablet_range.is_empty() {
            self.cursor = None;
            self.next_tablet_key = loc.partition.next_start_within(&self.range);
            return Ok(None);
        }

        let Some(server) = self.pick_server(&loc) else {
            // Every replica has failed once; give them another chance on the
            // next attempt.
            for replica in &loc.replicas {
                self.blacklist.remove(&replica.server);
            }
            return Err(RpcError::TabletUnavailable {
                tablet: loc.tablet_id.clone(),
                server: loc.leader().cloned().unwrap_or_default(),
                message: "no usable replica".to_string(),
            }
            .into());
        };

        let d = &self.descriptor;
        let req = OpenScanRequest {
            table_id,
            tablet_id: loc.tablet_id.clone(),
            projection: d.projection().indexes().to_vec(),
            predicates: d.predicates().to_encoded(),
            lower_bound: tablet_range.lower,
            upper_bound: tablet_range.upper,
            read_mode: d.read_mode(),
            snapshot_timestamp: match d.read_mode() {
                ReadMode::Snapshot => self.snapshot_timestamp,
                ReadMode::ReadLatest => None,
            },
            order_mode: d.order_mode(),
            leader_only: d.replica_selection() == ReplicaSelection::LeaderOnly,
            batch_size_bytes: d.batch_size_bytes(),
            batch_size_rows: d.batch_size_rows(),
            timeout_ms: u64::try_from(d.timeout().as_millis()).unwrap_or(u64::MAX),
        };
        let timeout = d.timeout();
        debug!(tablet = %loc.tablet_id, server = %server, "open_scan");

        self.last_target = Some((loc.tablet_id.clone(), server.clone()));
        self.stats.rpcs += 1;
        self.stats.tablets_opened += 1;
        let transport = self.client.transport().clone();
        let resp = retry::bounded(&self.cancel, timeout, transport.open_scan(&server, req)).await?;

        if self.descriptor.read_mode() == ReadMode::Snapshot && self.snapshot_timestamp.is_none() {
            self.snapshot_timestamp = resp.snapshot_timestamp;
            debug!(snapshot_timestamp = ?self.snapshot_timestamp, "pinned snapshot");
        }
        let handle = resp.handle.clone().filter(|_| resp.has_more);
        self.next_tablet_key = match handle {
            Some(_) => None,
            None => loc.partition.next_start_within(&self.range),
        };
        let tablet_id = loc.tablet_id.clone();
        self.cursor = Some(TabletCursor {
            location: loc,
            server,
            handle,
            call_seq_id: 0,
        });
        let batch = self.decode(&tablet_id, &resp)?;
        Ok(Some(batch))
    }

    async fn continue_tablet(&mut self) -> Result<RowBatch> {
        let Some(cursor) = self.cursor.as_ref() else {
            return Err(ScanError::NotOpen.into());
        };
        let Some(handle) = cursor.handle.clone() else {
            return Err(ScanError::NotOpen.into());
        };
        let server = cursor.server.clone();
        let seq = cursor.call_seq_id + 1;
        let tablet_id = cursor.location.tablet_id.clone();
        let tablet_start = cursor.location.partition.start_key.clone();

        let req = ContinueScanRequest {
            handle: handle.clone(),
            call_seq_id: seq,
            batch_size_bytes: self.descriptor.batch_size_bytes(),
            batch_size_rows: self.descriptor.batch_size_rows(),
        };
        self.last_target = Some((tablet_id.clone(), server.clone()));
        self.stats.rpcs += 1;
        let transport = self.client.transport().clone();
        let timeout = self.descriptor.timeout();

        match retry::bounded(&self.cancel, timeout, transport.continue_scan(&server, req)).await {
            Ok(resp) => {
                let batch = self.decode(&tablet_id, &resp)?;
                let next_handle = resp.handle.filter(|_| resp.has_more);
                let drained = next_handle.is_none();
                if let Some(cursor) = self.cursor.as_mut() {
                    cursor.call_seq_id = seq;
                    cursor.handle = next_handle;
                    if drained {
                        self.next_tablet_key = cursor.location.partition.next_start_within(&self.range);
                    }
                }
                Ok(batch)
            }
            Err(e) if self.descriptor.is_fault_tolerant() && retry::is_retriable(&e) => {
                warn!(
                    tablet = %tablet_id,
                    server = %server,
                    error = %e,
                    "continue_scan failed; resuming after last delivered key"
                );
                self.handle_retriable(&e).await;
                self.release_in_background(server, handle);
                self.cursor = None;
                let resume = match &self.last_primary_key {
                    Some(last) => successor(last).max(tablet_start),
                    None => tablet_start.max(self.range.lower.clone().unwrap_or_default()),
                };
                self.open_tablet(resume, 1).await
            }
            Err(e) => Err(retry::surface_continue_error(e)),
        }
    }

    /// Invalidate the failed tablet's location and stop using a server that
    /// failed as a whole.
    async fn handle_retriable(&mut self, err: &Error) {
        let Some((tablet, server)) = self.last_target.take() else {
            return;
        };
        self.client.locator().invalidate(&tablet).await;
        let server_level = match err {
            Error::Rpc(e) => e.failed_server().is_some(),
            Error::Scan(ScanError::Timeout(_)) => true,
            _ => false,
        };
        if server_level {
            debug!(server = %server, "blacklisting server for this scan");
            self.blacklist.insert(server);
        }
    }

    /// Fault-tolerant scans need the key of every delivered batch's last row
    /// to resume; a server that omits it fails the scan.
    fn decode(&mut self, tablet: &str, resp: &ScanResponse) -> Result<RowBatch> {
        let batch = decode_batch_limited(
            self.projection_schema().clone(),
            &resp.data,
            self.descriptor.batch_size_rows(),
        )?;
        self.stats.bytes += resp.data.len() as u64;
        if !batch.is_empty() {
            match &resp.last_primary_key {
                Some(key) => self.last_primary_key = Some(key.clone()),
                None if self.descriptor.is_fault_tolerant() => {
                    return Err(ScanError::CannotResume(tablet.to_string()).into());
                }
                None => {}
            }
        }
        Ok(batch)
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if let Some((server, handle)) = self.current_handle() {
            self.release_in_background(server, handle);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests;
