//! Runtime configuration: retry defaults, batch sizing, poll interval, page size.
//!
//! Every struct has a `Default` with the documented values and derives
//! `clap::Args`, so a binary can flatten [`RuntimeConfig`] into its CLI and
//! pick values up from `CALLFLOW_*` environment variables. The structs also
//! deserialize from partial JSON (missing fields keep their defaults).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest period a poll timer accepts. Smaller intervals, including zero,
/// are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Top-level configuration shared by the executor and the sessions.
#[derive(Debug, Clone, Default, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[command(flatten)]
    pub retry: RetryConfig,
    #[command(flatten)]
    pub batch: BatchConfig,
    #[command(flatten)]
    pub poll: PollConfig,
    #[command(flatten)]
    pub pagination: PaginationConfig,
}

/// Retry defaults applied when a caller does not override them.
#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. 0 disables retrying.
    #[arg(long = "retries", env = "CALLFLOW_RETRIES", default_value_t = 0)]
    pub max_retries: u32,
    /// Backoff base: the delay before the first retry, in milliseconds.
    #[arg(long = "retry-base-ms", env = "CALLFLOW_RETRY_BASE_MS", default_value_t = 1_000)]
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff delay, in milliseconds.
    #[arg(long = "retry-max-ms", env = "CALLFLOW_RETRY_MAX_MS", default_value_t = 30_000)]
    pub max_delay_ms: u64,
    /// Randomise each delay between zero and the computed backoff.
    #[arg(long = "retry-jitter", env = "CALLFLOW_RETRY_JITTER")]
    pub jitter: bool,
}

impl RetryConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

/// Batch runner defaults.
#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items executed concurrently per chunk.
    #[arg(long = "batch-size", env = "CALLFLOW_BATCH_SIZE", default_value_t = 5)]
    pub batch_size: usize,
    /// Pause between chunks, in milliseconds.
    #[arg(long = "batch-delay-ms", env = "CALLFLOW_BATCH_DELAY_MS", default_value_t = 0)]
    pub delay_between_batches_ms: u64,
}

impl BatchConfig {
    #[must_use]
    pub fn delay_between_batches(&self) -> Duration {
        Duration::from_millis(self.delay_between_batches_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            delay_between_batches_ms: 0,
        }
    }
}

/// Poll session defaults.
#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Period between poll cycles, in milliseconds.
    #[arg(long = "poll-interval-ms", env = "CALLFLOW_POLL_INTERVAL_MS", default_value_t = 30_000)]
    pub interval_ms: u64,
}

impl PollConfig {
    /// The configured period, never shorter than [`MIN_POLL_INTERVAL`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms).max(MIN_POLL_INTERVAL)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
        }
    }
}

/// Paginated session defaults.
#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    #[arg(long = "page-size", env = "CALLFLOW_PAGE_SIZE", default_value_t = 10)]
    pub page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { page_size: 10 }
    }
}
