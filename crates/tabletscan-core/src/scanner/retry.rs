//! RPC bounding and retry classification.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, RpcError, ScanError};

/// Run one RPC bounded by `timeout` and raced against `cancel`.
pub(crate) async fn bounded<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    fut: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, RpcError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled.into()),
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(inner) => inner.map_err(Error::from),
            Err(_) => Err(ScanError::Timeout(timeout).into()),
        },
    }
}

/// Sleep for `delay` unless cancelled first.
pub(crate) async fn backoff_sleep(cancel: &CancellationToken, delay: Duration) -> Result<(), Error> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(ScanError::Cancelled.into())
        } else {
            Ok(())
        };
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled.into()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Whether a failed scan RPC may succeed against a re-resolved tablet.
pub(crate) fn is_retriable(err: &Error) -> bool {
    match err {
        Error::Rpc(e) => e.is_retriable(),
        Error::Scan(ScanError::Timeout(_)) => true,
        _ => false,
    }
}

/// The error a non-fault-tolerant scan surfaces when continuing a tablet
/// fails: a lost handle means the server-side scanner expired.
pub(crate) fn surface_continue_error(err: Error) -> Error {
    match err {
        Error::Rpc(RpcError::ScannerNotFound(handle)) => ScanError::ScanExpired(handle).into(),
        other => other,
    }
}
