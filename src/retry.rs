//! Exponential-backoff retry for fallible async operations.

use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::errors::{Classify, ErrorKind, ErrorReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (attempt 0)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Policy for server calls: 3 retries, 1s base, 5s cap
    pub const fn network() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(5))
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay after a failed `attempt`: `min(base * 2^attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Retry `operation` on any failure.
    ///
    /// After the last retry the failure is recorded as a `network` error
    /// with the attempt count in its context and returned to the caller.
    pub async fn run<T, E, F, Fut>(
        &self,
        reporter: &ErrorReporter,
        context: serde_json::Value,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    reporter.log_error(
                        ErrorKind::Network,
                        format!("Operation failed after {} retries", self.max_retries),
                        Some(&err),
                        Some(with_attempts(context, attempt + 1)),
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Retry only while the failure is retryable.
    ///
    /// The terminal failure (exhausted or non-retryable) is recorded once,
    /// under the error's own classification.
    pub async fn run_classified<T, E, F, Fut>(
        &self,
        reporter: &ErrorReporter,
        context: serde_json::Value,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Network operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempts = attempt + 1, error = %err, "Network operation failed");
                    reporter.report(
                        "Network operation ultimately failed",
                        &err,
                        Some(with_attempts(context, attempt + 1)),
                    );
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}

fn with_attempts(context: serde_json::Value, attempts: u32) -> serde_json::Value {
    match context {
        serde_json::Value::Object(mut map) => {
            map.insert("attempts".to_string(), json!(attempts));
            serde_json::Value::Object(map)
        }
        serde_json::Value::Null => json!({ "attempts": attempts }),
        other => json!({ "attempts": attempts, "detail": other }),
    }
}
