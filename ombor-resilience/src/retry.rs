//! Retry with capped exponential backoff.
//!
//! Only infrastructure failures are retried. A business outcome returns
//! immediately, and when attempts run out only the last error surfaces.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::{Classify, ClientKind};

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub client: ClientKind,
    /// Total attempts, the first one included. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each later one.
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            client: ClientKind::Http,
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn new(client: ClientKind) -> Self {
        Self {
            client,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }
}

/// Retries infrastructure failures with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    /// Creates a retry policy from `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.config
            .initial_delay
            .checked_mul(multiplier)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    /// Calls `op` until it succeeds, returns a business outcome, or the
    /// attempts run out.
    pub async fn call<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.config.client.is_business(&err) => {
                    debug!(attempt, error = %err, "Business outcome, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= attempts => {
                    warn!(attempts, error = %err, "Giving up after retries");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after infrastructure failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry(attempts: u32) -> Retry {
        Retry::new(RetryConfig::new(ClientKind::SqlStore).with_max_attempts(attempts))
    }

    #[test]
    fn config_from_partial_input() {
        let config: RetryConfig =
            serde_json::from_str(r#"{ "client": "in_memory_store", "max_attempts": 5 }"#).unwrap();
        assert_eq!(config.client, ClientKind::InMemoryStore);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = Retry::new(
            RetryConfig::new(ClientKind::Http)
                .with_delays(Duration::from_millis(100), Duration::from_millis(500)),
        );
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for(4), Duration::from_millis(500));
        assert_eq!(retry.delay_for(64), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = retry(3)
            .call(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(StoreError::Unavailable(format!("attempt {n}")))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(StoreError::Unavailable(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("Expected last error, got: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn business_outcome_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = retry(5)
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::AlreadyExists)
            })
            .await;

        assert!(matches!(result, Err(StoreError::AlreadyExists)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result = retry(3)
            .call(|| async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(StoreError::Timeout),
                    n => Ok(n),
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_behaves_as_one() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = retry(0)
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Timeout)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
