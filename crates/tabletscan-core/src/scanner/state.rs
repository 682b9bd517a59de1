use std::fmt;

/// Lifecycle of a [`Scanner`](super::Scanner).
///
/// ```text
/// Closed -> Opening -> Open <-> BatchReady
///                        |          |
///                        +-> Exhausted
/// any -> Failed, any -> Closed (close)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Not opened yet, or closed by the caller.
    Closed,
    Opening,
    /// Open, no batch buffered; more rows may be available.
    Open,
    /// A decoded batch is buffered for the next `next_batch` call.
    BatchReady,
    /// Every tablet in range has been read.
    Exhausted,
    /// A fatal error occurred; it is returned again on every call.
    Failed,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Exhausted | ScanState::Failed)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Closed => "closed",
            ScanState::Opening => "opening",
            ScanState::Open => "open",
            ScanState::BatchReady => "batch_ready",
            ScanState::Exhausted => "exhausted",
            ScanState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counters collected over the life of a scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Scan RPCs issued (open and continue), including failed ones.
    pub rpcs: u64,
    pub retries: u64,
    /// Tablets opened, counting reopens after a failure.
    pub tablets_opened: u64,
    /// Non-empty batches returned to the caller.
    pub batches: u64,
    pub rows: u64,
    pub bytes: u64,
}
