//! # Contention Retry
//!
//! Re-runs a whole transaction when SQLite reports lock contention.
//!
//! ```text
//! attempt 1 ──► Contention ──► sleep(backoff × 1)
//! attempt 2 ──► Contention ──► sleep(backoff × 2)
//! attempt 3 ──► Contention ──► give up, surface Contention
//!
//! Any non-retryable result (Ok, domain error, ...) returns immediately.
//! ```
//!
//! Only safe for operations whose failed attempts leave nothing behind,
//! which holds for every service operation: each runs in one transaction
//! that is rolled back on drop.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::DbResult;

/// How many times to attempt a transaction and how long to wait between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `backoff × n` before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        RetryPolicy::new(1, Duration::ZERO)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Runs `attempt_fn` until it returns something other than a retryable
    /// error, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after contention"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut calls = 0;
        let result = fast(3)
            .run("test", || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err(DbError::Contention("database is locked".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: DbResult<()> = fast(2)
            .run("test", || {
                calls += 1;
                async { Err(DbError::PoolExhausted) }
            })
            .await;

        assert!(matches!(result, Err(DbError::PoolExhausted)));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_domain_errors() {
        let mut calls = 0;
        let result: DbResult<()> = fast(5)
            .run("test", || {
                calls += 1;
                async { Err(DbError::not_found("Order", "o1")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_no_retry_runs_once() {
        let mut calls = 0;
        let result: DbResult<()> = RetryPolicy::no_retry()
            .run("test", || {
                calls += 1;
                async { Err(DbError::Contention("database is locked".to_string())) }
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls, 1);
    }
}
