//! A tablet server for the tabletscan engine.
//!
//! Hosts an in-process [`MiniCluster`] behind a Unix socket so scan clients
//! in other processes can read from it, and provides the matching
//! [`SocketTransport`] for `ScanClient`. The cluster can also be used
//! directly as a locator and transport for in-process tests.

pub mod client;
pub mod cluster;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::SocketTransport;
pub use cluster::{Fault, MiniCluster, ScanOp, ServerConfig};
pub use server::TabletServer;
