//! Client side of the socket protocol.
//!
//! `SocketTransport` implements both [`TabletLocator`] and
//! [`TabletTransport`], so a `ScanClient` can scan a remote cluster:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabletscan_core::ScanClient;
//! use tabletscan_server::SocketTransport;
//!
//! # async fn demo() -> tabletscan_core::Result<()> {
//! let transport = Arc::new(SocketTransport::new("/tmp/tabletscan.sock"));
//! let client = ScanClient::new(transport.clone(), transport);
//! let table = client.open_table("demo").await?;
//! let rows = table.scanner().open().await?.read_all_tuples().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Requests are serialized over a single connection. A connection that fails
//! is dropped and re-established on the next call.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use tabletscan_core::error::RpcError;
use tabletscan_core::rpc::{
    ContinueScanRequest, OpenScanRequest, ScanResponse, TableInfo, TabletLocation,
    TabletLocator, TabletTransport,
};

use crate::error::ClientError;
use crate::protocol::{ErrorResponse, Request};

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    line_buf: String,
}

impl Connection {
    async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            line_buf: String::new(),
        })
    }

    async fn send_request(&mut self, req: &Request) -> Result<Value> {
        let mut data = serde_json::to_vec(req).map_err(ClientError::Serialization)?;
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;

        self.line_buf.clear();
        let n = self.reader.read_line(&mut self.line_buf).await?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }

        let resp: Value =
            serde_json::from_str(self.line_buf.trim()).map_err(ClientError::Serialization)?;
        Ok(resp)
    }
}

/// Scan RPCs and tablet lookups over a tablet server's Unix socket.
pub struct SocketTransport {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SocketTransport {
    /// A transport for the server at `path`. Connects lazily.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    /// Connect eagerly, failing if the server is not reachable.
    pub async fn connect(path: impl Into<PathBuf>) -> Result<Self> {
        let transport = Self::new(path);
        let conn = Connection::connect(&transport.path).await?;
        *transport.conn.lock().await = Some(conn);
        Ok(transport)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn call(&self, req: &Request) -> Result<Value> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(Connection::connect(&self.path).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ClientError::Disconnected);
        };
        match conn.send_request(req).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "dropping connection");
                *guard = None;
                Err(e)
            }
        }
    }

    async fn call_for<T: DeserializeOwned>(&self, req: Request, field: &str) -> Result<T> {
        let resp = self.call(&req).await?;
        check_error(&resp)?;
        let value = resp
            .get(field)
            .cloned()
            .ok_or_else(|| ClientError::Protocol(format!("response is missing '{field}'")))?;
        serde_json::from_value(value).map_err(ClientError::Serialization)
    }

    async fn call_empty(&self, req: Request) -> Result<()> {
        let resp = self.call(&req).await?;
        check_error(&resp)
    }
}

#[async_trait]
impl TabletLocator for SocketTransport {
    async fn lookup_table(&self, name: &str) -> std::result::Result<TableInfo, RpcError> {
        let req = Request::LookupTable {
            table: name.to_string(),
        };
        let info: TableInfo = self
            .call_for(req, "table")
            .await
            .map_err(|e| e.into_rpc("master"))?;
        info.schema
            .validate()
            .map_err(|e| RpcError::Internal(format!("server sent an invalid schema: {e}")))?;
        Ok(info)
    }

    async fn locate_tablet(
        &self,
        table_id: &str,
        key: &[u8],
    ) -> std::result::Result<TabletLocation, RpcError> {
        let req = Request::LocateTablet {
            table_id: table_id.to_string(),
            key: key.to_vec(),
        };
        self.call_for(req, "tablet")
            .await
            .map_err(|e| e.into_rpc("master"))
    }

    async fn invalidate(&self, _tablet_id: &str) {}
}

#[async_trait]
impl TabletTransport for SocketTransport {
    async fn open_scan(
        &self,
        server: &str,
        request: OpenScanRequest,
    ) -> std::result::Result<ScanResponse, RpcError> {
        let req = Request::OpenScan {
            server: server.to_string(),
            request,
        };
        self.call_for(req, "scan")
            .await
            .map_err(|e| e.into_rpc(server))
    }

    async fn continue_scan(
        &self,
        server: &str,
        request: ContinueScanRequest,
    ) -> std::result::Result<ScanResponse, RpcError> {
        let req = Request::ContinueScan {
            server: server.to_string(),
            request,
        };
        self.call_for(req, "scan")
            .await
            .map_err(|e| e.into_rpc(server))
    }

    async fn close_scan(&self, server: &str, handle: &str) -> std::result::Result<(), RpcError> {
        let req = Request::CloseScan {
            server: server.to_string(),
            handle: handle.to_string(),
        };
        self.call_empty(req).await.map_err(|e| e.into_rpc(server))
    }

    async fn keep_alive(&self, server: &str, handle: &str) -> std::result::Result<(), RpcError> {
        let req = Request::KeepAlive {
            server: server.to_string(),
            handle: handle.to_string(),
        };
        self.call_empty(req).await.map_err(|e| e.into_rpc(server))
    }
}

fn check_error(resp: &Value) -> Result<()> {
    if resp.get("error").is_some() {
        let err: ErrorResponse =
            serde_json::from_value(resp.clone()).map_err(ClientError::Serialization)?;
        return Err(ClientError::Server(err));
    }
    if resp.get("ok").and_then(Value::as_bool) != Some(true) {
        return Err(ClientError::Protocol(format!("unexpected response: {resp}")));
    }
    Ok(())
}
