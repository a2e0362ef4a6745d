//! Batch engine configuration consumed at job creation time.

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration surface for a batch job.
///
/// Parsing of user-facing configuration files is a front-end concern; this
/// struct is the validated form the engine consumes. Environment overrides
/// are provided for process-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of concurrent worker loops per job. Must be positive.
    pub concurrency: usize,
    /// Maximum retry attempts for transiently failing tasks. Zero disables retry.
    pub max_retry_attempts: u32,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub retry_backoff_base_ms: u64,
    /// Cap on the computed backoff delay, in milliseconds.
    pub retry_backoff_max_ms: u64,
    /// Checkpoint after this many completed tasks.
    pub checkpoint_interval_tasks: usize,
    /// Checkpoint after this many seconds, whichever comes first.
    pub checkpoint_interval_secs: u64,
    /// Whether a permanently failed task aborts the remaining pending tasks.
    pub continue_on_error: bool,
    /// Bounded task queue capacity. Must be positive.
    pub queue_capacity: usize,
    /// Minimum interval between emitted progress events, in milliseconds.
    pub progress_event_interval_ms: u64,
    /// Retention window for terminal jobs before cleanup, in hours.
    pub job_retention_hours: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retry_attempts: 2,
            retry_backoff_base_ms: 1000,
            retry_backoff_max_ms: 60_000,
            checkpoint_interval_tasks: 10,
            checkpoint_interval_secs: 30,
            continue_on_error: true,
            queue_capacity: 64,
            progress_event_interval_ms: 1000,
            job_retention_hours: 24,
        }
    }
}

impl BatchConfig {
    /// Build a config from defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(concurrency) = std::env::var("DOCBATCH_CONCURRENCY") {
            config.concurrency = concurrency.parse().map_err(|e| {
                BatchError::Configuration(format!("Invalid concurrency: {e}"))
            })?;
        }

        if let Ok(max_retries) = std::env::var("DOCBATCH_MAX_RETRY_ATTEMPTS") {
            config.max_retry_attempts = max_retries.parse().map_err(|e| {
                BatchError::Configuration(format!("Invalid max_retry_attempts: {e}"))
            })?;
        }

        if let Ok(capacity) = std::env::var("DOCBATCH_QUEUE_CAPACITY") {
            config.queue_capacity = capacity.parse().map_err(|e| {
                BatchError::Configuration(format!("Invalid queue_capacity: {e}"))
            })?;
        }

        if let Ok(backoff) = std::env::var("DOCBATCH_RETRY_BACKOFF_BASE_MS") {
            config.retry_backoff_base_ms = backoff.parse().map_err(|e| {
                BatchError::Configuration(format!("Invalid retry_backoff_base_ms: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BatchError::Configuration(
                "concurrency must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(BatchError::Configuration(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_base_ms {
            return Err(BatchError::Configuration(
                "retry_backoff_max_ms must be >= retry_backoff_base_ms".to_string(),
            ));
        }
        if self.checkpoint_interval_tasks == 0 {
            return Err(BatchError::Configuration(
                "checkpoint_interval_tasks must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn progress_event_interval(&self) -> Duration {
        Duration::from_millis(self.progress_event_interval_ms)
    }
}
