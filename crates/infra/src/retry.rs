//! Bounded retry with backoff for transient engine failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };

        delay.min(self.max_delay)
    }

    /// Check if more retries are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Run `op`, retrying while it fails with a transient error
/// (`LockTimeout`, `VersionConflict`) and the policy allows it.
///
/// The last error is surfaced once retries are exhausted.
pub fn retry_transient<T>(
    policy: &RetryPolicy,
    op: impl FnMut() -> EngineResult<T>,
) -> EngineResult<T> {
    retry_when(policy, EngineError::is_transient, op)
}

/// Like [`retry_transient`], but only errors accepted by `retryable` are retried.
pub fn retry_when<T>(
    policy: &RetryPolicy,
    retryable: impl Fn(&EngineError) -> bool,
    mut op: impl FnMut() -> EngineResult<T>,
) -> EngineResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(err) if retryable(&err) && policy.should_retry(attempt) => {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying transient failure");
                std::thread::sleep(delay);
            }
            other => return other,
        }
    }
}
