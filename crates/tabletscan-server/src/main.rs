//! tabletscan-server binary.
//!
//! Starts an in-process cluster, loads a demo table and serves it over a
//! Unix domain socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tabletscan_server::{MiniCluster, ServerConfig, TabletServer};
use tracing::info;

/// Mini tablet server for tabletscan clients.
#[derive(Parser, Debug)]
#[command(name = "tabletscan-server", version)]
struct Cli {
    /// Unix socket path to listen on (default: ~/.local/share/tabletscan/server.sock).
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Tablet servers in the cluster.
    #[arg(long, default_value_t = 3)]
    servers: usize,

    /// Rows loaded into the `demo` table. Zero skips the table.
    #[arg(long, default_value_t = 100)]
    demo_rows: i32,

    /// Tablets the `demo` table is split into.
    #[arg(long, default_value_t = 2)]
    tablets: usize,

    /// Idle time in milliseconds before a server-side scanner is discarded.
    #[arg(long, default_value_t = 60_000)]
    scanner_ttl_ms: u64,
}

fn default_socket_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabletscan")
        .join("server.sock")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let socket_path = cli.socket.unwrap_or_else(default_socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = ServerConfig::default()
        .with_num_servers(cli.servers)
        .with_scanner_ttl(Duration::from_millis(cli.scanner_ttl_ms));
    let cluster = Arc::new(MiniCluster::new(config));
    if cli.demo_rows > 0 {
        cluster.create_demo_table("demo", cli.demo_rows, cli.tablets)?;
    }
    info!(
        socket = %socket_path.display(),
        servers = cli.servers,
        demo_rows = cli.demo_rows,
        "starting"
    );

    TabletServer::new(cluster, socket_path).run().await?;
    Ok(())
}
