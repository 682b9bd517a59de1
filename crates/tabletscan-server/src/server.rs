//! Unix domain socket server in front of a [`MiniCluster`].
//!
//! Each connected client sends JSON-line requests and receives JSON-line
//! responses. One socket serves every tablet server of the cluster; scan
//! requests name the server they are addressed to.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use tabletscan_core::rpc::{TabletLocator, TabletTransport};

use crate::cluster::MiniCluster;
use crate::protocol::{Request, Response};

/// A tablet server listening on a Unix socket.
pub struct TabletServer {
    cluster: Arc<MiniCluster>,
    socket_path: PathBuf,
}

impl TabletServer {
    pub fn new(cluster: Arc<MiniCluster>, socket_path: PathBuf) -> Self {
        Self {
            cluster,
            socket_path,
        }
    }

    pub fn cluster(&self) -> &Arc<MiniCluster> {
        &self.cluster
    }

    /// Run the server, accepting connections until a shutdown signal is received.
    ///
    /// On startup, removes any stale socket file and binds a new one.
    /// On shutdown (SIGINT or SIGTERM), removes the socket file before exiting.
    pub async fn run(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "tablet server listening");

        let accept_loop = async {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let cluster = self.cluster.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(cluster, stream).await {
                                warn!(error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            result = shutdown_signal() => {
                if let Err(e) = result {
                    warn!(error = %e, "signal handler failed");
                }
                info!("shutdown signal received");
            }
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file on shutdown");
            } else {
                info!(path = %self.socket_path.display(), "socket file removed");
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    cluster: Arc<MiniCluster>,
    stream: tokio::net::UnixStream,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            debug!("client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(req) => dispatch(&cluster, req).await,
            Err(e) => Response::error("ParseError", e.to_string()),
        };

        let mut resp_bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => serde_json::to_vec(&Response::error("SerializationError", e.to_string()))
                .map_err(std::io::Error::other)?,
        };
        resp_bytes.push(b'\n');

        writer.write_all(&resp_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn dispatch(cluster: &MiniCluster, req: Request) -> Response {
    let result = match req {
        Request::LookupTable { table } => cluster.lookup_table(&table).await.map(Response::ok_table),
        Request::LocateTablet { table_id, key } => cluster
            .locate_tablet(&table_id, &key)
            .await
            .map(Response::ok_tablet),
        Request::OpenScan { server, request } => cluster
            .open_scan(&server, request)
            .await
            .map(Response::ok_scan),
        Request::ContinueScan { server, request } => cluster
            .continue_scan(&server, request)
            .await
            .map(Response::ok_scan),
        Request::CloseScan { server, handle } => cluster
            .close_scan(&server, &handle)
            .await
            .map(|()| Response::ok_empty()),
        Request::KeepAlive { server, handle } => cluster
            .keep_alive(&server, &handle)
            .await
            .map(|()| Response::ok_empty()),
    };
    result.unwrap_or_else(|e| {
        debug!(error = %e, "request failed");
        Response::from_rpc(&e)
    })
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
