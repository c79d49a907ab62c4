use crate::error::{Result, TabError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Add up to 1s of random jitter to each delay to avoid thundering herds.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Wraps an async operation with classified exponential backoff.
///
/// Errors with `is_retryable() == false` surface immediately; retryable
/// errors are absorbed up to `max_attempts`, after which the last error is
/// wrapped as [`TabError::RetriesExhausted`] with the attempt count. A 429
/// `Retry-After` hint overrides the computed delay for that wait.
///
/// Dropping the returned future mid-backoff cancels the loop; nothing further
/// is scheduled.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut delay = self.config.initial_delay;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(err) if !err.is_retryable() => {
                    return Err(err);
                }
                Err(err) if attempt >= self.config.max_attempts => {
                    warn!("Operation failed after {} attempts: {}", attempt, err);
                    return Err(TabError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    // Retry-After beats the computed backoff for this wait
                    let mut wait = err.retry_after_hint().unwrap_or(delay);
                    if self.config.jitter {
                        wait += Duration::from_millis((rand::random::<f64>() * 1000.0) as u64);
                    }

                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, wait
                    );
                    sleep(wait).await;

                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * self.config.multiplier)
                            .min(self.config.max_delay.as_secs_f64()),
                    );
                }
            }
        }
    }
}
