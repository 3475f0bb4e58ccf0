use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::config::ClickhouseConfig;
use crate::error::ExporterError;

/// Exponential backoff settings for transient network failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl From<&ClickhouseConfig> for RetryConfig {
    fn from(cfg: &ClickhouseConfig) -> Self {
        Self {
            max_attempts: cfg.backoff_max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.backoff_base_delay_ms),
            max_delay: Duration::from_millis(cfg.backoff_max_delay_ms),
            jitter: cfg.backoff_jitter,
        }
    }
}

/// Run `operation` with exponential backoff, retrying only transient errors.
///
/// The last error is returned once the attempt budget is exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ExporterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExporterError>>,
{
    let mut delay = config.base_delay;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() && attempt < config.max_attempts => {
                let sleep_for = if config.jitter {
                    let micros = delay.as_micros() as u64;
                    Duration::from_micros(rand::rng().random_range(micros / 2..=micros))
                } else {
                    delay
                };
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = sleep_for.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(sleep_for).await;
                delay = (delay * 2).min(config.max_delay);
            }
            Err(err) => {
                error!(operation = operation_name, attempt, error = %err, "operation failed");
                return Err(err);
            }
        }
    }

    unreachable!("retry loop always returns within the attempt budget")
}
