//! Rate-limit backoff
//!
//! Rate-limit signals are not ordinary failures: the request is retried after a
//! linearly growing pause instead of counting against the work item's retries.

use crate::config::BackoffConfig;
use crate::TidemarkError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Something that can wait
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(duration);
    }
}

/// Result of a backed-off operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffOutcome<T> {
    Completed(T),
    /// Still rate limited after every retry
    GaveUp { attempts: u32 },
}

/// Retries rate-limited operations with a linearly growing delay
pub struct Backoff {
    base_delay: Duration,
    max_retries: u32,
    sleeper: Arc<dyn Sleeper>,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_retries: u32, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            base_delay,
            max_retries,
            sleeper,
        }
    }

    pub fn from_config(config: &BackoffConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            config.max_retries,
            sleeper,
        )
    }

    /// Runs `op`, sleeping `(attempt + 1) * base_delay` after each rate limit
    ///
    /// # Arguments
    ///
    /// * `label` - Log prefix of the entity being loaded
    /// * `cancel` - Interrupts a pending sleep
    /// * `op` - The operation; `Err(TidemarkError::RateLimited)` triggers a retry
    ///
    /// # Returns
    ///
    /// * `Ok(BackoffOutcome::Completed(T))` - The operation returned a value
    /// * `Ok(BackoffOutcome::GaveUp)` - Rate limited on every attempt
    /// * `Err(TidemarkError::Aborted)` - Cancelled while waiting
    /// * `Err(TidemarkError)` - Any other error from `op`, unchanged
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<BackoffOutcome<T>, TidemarkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TidemarkError>>,
    {
        let mut retries = 0;

        loop {
            match op().await {
                Err(TidemarkError::RateLimited) => {
                    if retries >= self.max_retries {
                        tracing::warn!(
                            "{}: still rate limited after {} retries, giving up",
                            label,
                            retries
                        );
                        return Ok(BackoffOutcome::GaveUp {
                            attempts: retries + 1,
                        });
                    }

                    retries += 1;
                    let delay = self.base_delay * retries;
                    tracing::info!(
                        "{}: rate limited, waiting {}s before retry {}/{}",
                        label,
                        delay.as_secs_f64(),
                        retries,
                        self.max_retries
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TidemarkError::Aborted),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
                other => return other.map(BackoffOutcome::Completed),
            }
        }
    }
}
