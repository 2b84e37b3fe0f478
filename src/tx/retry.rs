//! Retry on nonce conflicts
//!
//! A conflict means another sender won the race for a nonce. The operation
//! handed to the controller re-allocates on every call, so a retry always runs
//! with a fresh nonce. Any other error is returned immediately.

use crate::error::SdkResult;

use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Same base interval before every retry
    #[default]
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// Uniform in `[0, interval]`
    #[default]
    Full,
    None,
}

/// Retry policy for conflicting sends; built once, never mutated
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub policy: BackoffPolicy,
    pub jitter: Jitter,
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::Constant,
            jitter: Jitter::Full,
            interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Runs a send operation until it succeeds, fails fatally, or runs out of attempts
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Invoke `operation`, retrying only on `Conflict`
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> SdkResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SdkResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Succeeded after {} attempts", attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay();
                    warn!(
                        "Nonce conflict (attempt {}/{}), retrying in {:?}: {}",
                        attempt, max_attempts, delay, e
                    );
                    crate::metrics::record_retry();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Giving up after {} conflicting attempts", attempt);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Wait before the next attempt
    pub fn delay(&self) -> Duration {
        let base = match self.config.policy {
            BackoffPolicy::Constant => self.config.interval(),
        };

        match self.config.jitter {
            Jitter::Full => base.mul_f64(rand::thread_rng().gen_range(0.0..=1.0)),
            Jitter::None => base,
        }
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
