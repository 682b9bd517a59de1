//! JSON-lines wire protocol between scan clients and the tablet server.
//!
//! One request per line, one response per line. Requests are tagged by `op`;
//! successful responses carry `"ok": true`, failures an `error` code.

use serde::{Deserialize, Serialize};

use tabletscan_core::error::RpcError;
use tabletscan_core::rpc::{
    ContinueScanRequest, OpenScanRequest, ScanResponse, TableInfo, TabletLocation,
};

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    LookupTable {
        table: String,
    },
    LocateTablet {
        table_id: String,
        #[serde(default)]
        key: Vec<u8>,
    },
    OpenScan {
        server: String,
        request: OpenScanRequest,
    },
    ContinueScan {
        server: String,
        request: ContinueScanRequest,
    },
    CloseScan {
        server: String,
        handle: String,
    },
    KeepAlive {
        server: String,
        handle: String,
    },
}

/// A response sent back to the client.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Error(ErrorResponse),
}

/// Successful response variants.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OkResponse {
    Table { ok: bool, table: TableInfo },
    Tablet { ok: bool, tablet: TabletLocation },
    Scan { ok: bool, scan: ScanResponse },
    Empty { ok: bool },
}

/// Error response. `tablet`, `server` and `name` carry the fields needed to
/// rebuild the original [`RpcError`] on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tablet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Response {
    pub fn ok_empty() -> Self {
        Response::Ok(OkResponse::Empty { ok: true })
    }

    pub fn ok_table(table: TableInfo) -> Self {
        Response::Ok(OkResponse::Table { ok: true, table })
    }

    pub fn ok_tablet(tablet: TabletLocation) -> Self {
        Response::Ok(OkResponse::Tablet { ok: true, tablet })
    }

    pub fn ok_scan(scan: ScanResponse) -> Self {
        Response::Ok(OkResponse::Scan { ok: true, scan })
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            error: error.into(),
            message: message.into(),
            tablet: None,
            server: None,
            name: None,
        })
    }

    pub fn from_rpc(err: &RpcError) -> Self {
        Response::Error(ErrorResponse::from_rpc(err))
    }
}

impl ErrorResponse {
    pub fn from_rpc(err: &RpcError) -> Self {
        let mut resp = ErrorResponse {
            error: String::new(),
            message: err.to_string(),
            tablet: None,
            server: None,
            name: None,
        };
        resp.error = match err {
            RpcError::TabletUnavailable {
                tablet,
                server,
                message,
            } => {
                resp.tablet = Some(tablet.clone());
                resp.server = Some(server.clone());
                resp.message = message.clone();
                "TabletUnavailable"
            }
            RpcError::NotLeader { tablet, server } => {
                resp.tablet = Some(tablet.clone());
                resp.server = Some(server.clone());
                "NotLeader"
            }
            RpcError::ServerUnavailable { server, message } => {
                resp.server = Some(server.clone());
                resp.message = message.clone();
                "ServerUnavailable"
            }
            RpcError::TabletNotFound { tablet, server } => {
                resp.tablet = Some(tablet.clone());
                resp.server = Some(server.clone());
                "TabletNotFound"
            }
            RpcError::ScannerNotFound(handle) => {
                resp.name = Some(handle.clone());
                "ScannerNotFound"
            }
            RpcError::TableNotFound(table) => {
                resp.name = Some(table.clone());
                "TableNotFound"
            }
            RpcError::InvalidRequest(message) => {
                resp.message = message.clone();
                "InvalidRequest"
            }
            RpcError::Internal(message) => {
                resp.message = message.clone();
                "InternalError"
            }
        }
        .to_string();
        resp
    }

    /// Rebuild the server's error. Unknown codes become `Internal`.
    pub fn into_rpc(self) -> RpcError {
        let tablet = self.tablet.unwrap_or_default();
        let server = self.server.unwrap_or_default();
        let name = self.name.unwrap_or_default();
        match self.error.as_str() {
            "TabletUnavailable" => RpcError::TabletUnavailable {
                tablet,
                server,
                message: self.message,
            },
            "NotLeader" => RpcError::NotLeader { tablet, server },
            "ServerUnavailable" => RpcError::ServerUnavailable {
                server,
                message: self.message,
            },
            "TabletNotFound" => RpcError::TabletNotFound { tablet, server },
            "ScannerNotFound" => RpcError::ScannerNotFound(name),
            "TableNotFound" => RpcError::TableNotFound(name),
            "InvalidRequest" | "ParseError" => RpcError::InvalidRequest(self.message),
            _ => RpcError::Internal(format!("{}: {}", self.error, self.message)),
        }
    }
}
