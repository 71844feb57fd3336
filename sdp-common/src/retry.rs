//! Retry Logic
//!
//! Bounded exponential backoff for operations that can fail transiently
//! (object fetch, output upload, model invocation, message delivery).
//!
//! Retry state lives only inside one call of [`retry_with_backoff`]. If the
//! surrounding invocation is abandoned, the loop is abandoned with it and the
//! next delivery starts from attempt 1.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry parameters
///
/// **Backoff Strategy:**
/// - First retry waits `base_delay_ms`
/// - Each further retry doubles the delay
/// - Delay is capped at `max_delay_ms`
/// - At most `max_attempts` calls in total (first call included)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(1, 0, 0)
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Retry an operation with exponential backoff while it fails transiently.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If the error is transient ([`Error::is_transient`]):
///    a. If attempts remain: log WARN, back off, retry
///    b. Otherwise: log ERROR, return [`Error::RetriesExhausted`]
/// 4. Any other error is returned immediately (no retry)
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "fetch input/sales.csv")
/// * `policy` - Attempt cap and delays
/// * `operation` - Async closure performing one attempt
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }

                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Operation failed: retry attempts exhausted"
                    );
                    return Err(Error::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }

                let backoff = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}
