// In crates/execution/src/retry.rs

use crate::{Error, Result};
use app_config::types::RetrySettings;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff with a bounded number of attempts and a per-attempt timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings, call_timeout: Duration) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            call_timeout,
        }
    }

    /// Backoff before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Each attempt is bounded by `call_timeout`.
    ///
    /// `op` is handed the 1-based attempt number. Callers must send the same
    /// idempotency token on every attempt.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.call_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.call_timeout)),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!(%what, attempt, error = %e, "Retries exhausted.");
                    return Err(e);
                }
                Err(e) => {
                    let wait = self.backoff(attempt);
                    tracing::warn!(%what, attempt, error = %e, backoff_ms = wait.as_millis() as u64, "Retrying after transient failure.");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
