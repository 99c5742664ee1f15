//! Bounded exponential backoff for establishing the destination connection

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{IngestError, IngestResult};

/// Attempt ceiling plus capped doubling delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `connect` until it succeeds or the attempt budget is spent
///
/// Exhaustion yields [`IngestError::Connection`] carrying the last failure.
pub async fn connect_with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut connect: F) -> IngestResult<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match connect().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "Connected after retry");
                }
                return Ok(value);
            },
            Err(e) => {
                last_error = e.to_string();
                warn!("Connection attempt {}/{} failed: {}", attempt, max_attempts, last_error);

                if attempt < max_attempts {
                    let delay = policy.delay_for(attempt);
                    info!("Retrying in {} ms...", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
            },
        }
    }

    Err(IngestError::Connection {
        attempts: max_attempts,
        message: last_error,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_secs(8));
        assert_eq!(policy.delay_for(40), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = connect_with_retry(&RetryPolicy::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err("connection refused")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        // 500 ms + 1000 ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_is_connection_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
        };
        let started = tokio::time::Instant::now();

        let result: IngestResult<()> = connect_with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("host unreachable") }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(250));
        match result {
            Err(IngestError::Connection { attempts, message }) => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "host unreachable");
            },
            other => panic!("expected connection error, got {:?}", other),
        }
    }
}
