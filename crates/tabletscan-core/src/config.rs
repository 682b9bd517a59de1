//! Client-wide scan configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::DEFAULT_BATCH_SIZE_BYTES;

/// Defaults applied to every scan opened through a
/// [`ScanClient`](crate::client::ScanClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Batch size requested from tablet servers when a scan does not set one.
    /// Default: 1 MB
    pub default_batch_size_bytes: usize,

    /// Per-RPC timeout when a scan does not set one.
    /// Default: 30 seconds
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,

    /// Retry behavior for retriable tablet failures.
    pub retry: RetryPolicy,

    /// Upper bound on how long `close` waits for the server to release a
    /// scanner handle.
    /// Default: 1 second
    #[serde(with = "duration_ms")]
    pub close_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_batch_size_bytes: DEFAULT_BATCH_SIZE_BYTES,
            default_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl ScanConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: ScanConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.default_batch_size_bytes == 0 {
            return Err(Error::Config("default_batch_size_bytes must be > 0".into()));
        }
        if self.default_timeout.is_zero() {
            return Err(Error::Config("default_timeout must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(Error::Config(
                "retry.initial_backoff must not exceed retry.max_backoff".into(),
            ));
        }
        Ok(())
    }

    /// Builder-style: set the default batch size.
    pub fn with_batch_size_bytes(mut self, bytes: usize) -> Self {
        self.default_batch_size_bytes = bytes;
        self
    }

    /// Builder-style: set the default per-RPC timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Builder-style: set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder-style: set the close timeout.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

/// Exponential backoff with jitter for retriable failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per operation, including the first.
    /// Default: 10
    pub max_attempts: u32,
    /// Default: 10 ms
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Default: 2 seconds
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, up to `max_attempts` times. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): the exponential
    /// backoff capped at `max_backoff`, with up to 50% random jitter removed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_backoff);
        let millis = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
        if millis < 2 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0..=millis / 2);
        Duration::from_millis(millis - jitter)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
