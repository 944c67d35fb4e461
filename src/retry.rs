use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::StreamConfig;
use crate::error::WatcherError;
use crate::logging::{ErrorLogger, LogContext};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, 0 for no limit
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter so reconnecting clients spread out
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff used for head stream reconnection
    pub fn for_reconnect(stream: &StreamConfig) -> Self {
        Self {
            max_attempts: stream.max_reconnect_attempts,
            initial_delay_ms: stream.reconnect_initial_delay_ms,
            max_delay_ms: stream.reconnect_max_delay_ms,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry with exponential backoff and jitter
pub struct RetryManager {
    config: RetryConfig,
    operation_name: String,
}

impl RetryManager {
    pub fn new(operation_name: &str, config: RetryConfig) -> Self {
        Self {
            config,
            operation_name: operation_name.to_string(),
        }
    }

    /// Run `operation` until it succeeds, fails with a non-recoverable error or
    /// runs out of attempts. The first call is made after the first delay.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, WatcherError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, WatcherError>>,
    {
        let mut attempt: u32 = 1;

        loop {
            let delay = self.calculate_delay(attempt);
            sleep(delay).await;

            match operation().await {
                Ok(result) => {
                    ErrorLogger::log_reconnected(attempt);
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_recoverable() {
                        LogContext::new("retry", &self.operation_name)
                            .with_retry_count(attempt)
                            .with_metadata("reason", serde_json::json!("non_recoverable"))
                            .error(&format!("Non-recoverable error, aborting retries: {}", error));
                        return Err(error);
                    }

                    if self.config.max_attempts != 0 && attempt >= self.config.max_attempts {
                        LogContext::new("retry", &self.operation_name)
                            .with_metadata("max_attempts", serde_json::json!(self.config.max_attempts))
                            .error(&format!(
                                "All {} retry attempts failed: {}",
                                self.config.max_attempts, error
                            ));
                        return Err(error);
                    }

                    ErrorLogger::log_reconnect_attempt(
                        &error,
                        attempt + 1,
                        self.calculate_delay(attempt + 1).as_millis() as u64,
                    );
                    attempt += 1;
                }
            }
        }
    }

    /// Calculate delay for the given attempt number
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64;
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let exponential_delay = base_delay * self.config.backoff_multiplier.powi(exponent);

        let capped_delay = exponential_delay.min(self.config.max_delay_ms as f64);

        let final_delay = if self.config.jitter {
            let jitter_factor = 0.1; // 10% jitter
            let jitter = capped_delay * jitter_factor * (rand::random::<f64>() * 2.0 - 1.0);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}
