use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use super::LlmError;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Bounded retries with exponential backoff.
///
/// Attempt `n` (0-based) that fails and is not the last one is followed by a
/// sleep of `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    /// `op` receives the 0-based attempt index; the last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt + 1 >= self.max_attempts || !err.is_retryable() {
                error!(
                    "LLM request failed after {} attempts, URL={}, error={}",
                    attempt + 1,
                    label,
                    err
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                "LLM request failed (attempt {}/{}), URL={}, retry in {:.1}s, error={}",
                attempt + 1,
                self.max_attempts,
                label,
                delay.as_secs_f64(),
                err
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(common::DEFAULT_MAX_RETRIES)
    }
}
