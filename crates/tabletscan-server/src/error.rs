//! Error types for the socket client.

use thiserror::Error;

use tabletscan_core::error::RpcError;

use crate::protocol::ErrorResponse;

/// Errors returned by `SocketTransport` before they are mapped onto
/// [`RpcError`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("server disconnected")]
    Disconnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {}: {}", .0.error, .0.message)]
    Server(ErrorResponse),
}

impl ClientError {
    /// Map onto the scan engine's RPC errors. A broken connection means the
    /// addressed server is unreachable.
    pub fn into_rpc(self, server: &str) -> RpcError {
        match self {
            ClientError::Io(e) => RpcError::ServerUnavailable {
                server: server.to_string(),
                message: e.to_string(),
            },
            ClientError::Disconnected => RpcError::ServerUnavailable {
                server: server.to_string(),
                message: "server disconnected".into(),
            },
            ClientError::Serialization(e) => RpcError::Internal(e.to_string()),
            ClientError::Protocol(message) => RpcError::Internal(message),
            ClientError::Server(resp) => resp.into_rpc(),
        }
    }
}
