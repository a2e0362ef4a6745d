//! # Backoff Calculation
//!
//! Exponential backoff for transient task failures, expressed as an explicit
//! per-task retry state machine (attempt count, next-eligible time) so
//! backoff timing is deterministic to test.
//!
//! ## Key Features
//!
//! - **Exponential Backoff**: Configurable base delay with exponential growth
//! - **Maximum Delay Caps**: Prevent unbounded backoff growth
//! - **Jitter Support**: Optional randomization to prevent thundering herd

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::BatchConfig;

/// Configuration for backoff calculation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Exponential multiplier.
    pub multiplier: f64,
    /// Whether to add jitter to the computed delay.
    pub jitter_enabled: bool,
    /// Maximum jitter percentage (0.0 to 1.0).
    pub max_jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_enabled: true,
            max_jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            base_delay_ms: config.retry_backoff_base_ms,
            max_delay_ms: config.retry_backoff_max_ms,
            ..Self::default()
        }
    }

    /// Delay before the given retry, where `attempt` is the number of
    /// attempts already made (1 after the first failure).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let mut delay_ms = exponential.min(self.max_delay_ms as f64) as u64;

        if self.jitter_enabled {
            delay_ms = self.apply_jitter(delay_ms);
        }

        Duration::from_millis(delay_ms)
    }

    /// Apply jitter to the delay to prevent thundering herd.
    fn apply_jitter(&self, delay_ms: u64) -> u64 {
        use rand::Rng;

        let jitter_range = (delay_ms as f64 * self.max_jitter) as u64;
        if jitter_range == 0 {
            return delay_ms;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0..=jitter_range);

        if rng.gen_bool(0.5) {
            delay_ms.saturating_add(jitter)
        } else {
            delay_ms.saturating_sub(jitter)
        }
    }
}

/// Per-task retry state: how many attempts have been made and when the next
/// one becomes eligible.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub next_eligible_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Record a transient failure and compute the delay before the next
    /// attempt under the given policy.
    pub fn schedule_retry(&mut self, policy: &BackoffPolicy) -> Duration {
        let delay = policy.delay_for_attempt(self.attempts);
        self.next_eligible_at =
            Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
        delay
    }

    /// Whether another attempt is allowed under `max_retry_attempts` retries
    /// beyond the first attempt.
    pub fn can_retry(&self, max_retry_attempts: u32) -> bool {
        self.attempts <= max_retry_attempts
    }
}
