// ABOUTME: Retry with exponential backoff for multi-statement database writes
// ABOUTME: Distinguishes transient lock/timeout failures from permanent ones
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Transaction retry
//!
//! Turn commits run after the model has already produced output, so a
//! transient `database is locked` must not lose the reply. The closure passed
//! to [`retry_transaction`] is expected to open and commit its own
//! transaction; a failed attempt is rolled back by `sqlx` when the
//! transaction is dropped.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::errors::{AppError, ErrorCode};

/// How often and how patiently to retry
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the given attempt budget and base delay
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff before attempt `attempt + 1`, where `attempt` starts at 1
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1_u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Last error of an exhausted retry loop
#[derive(Debug)]
pub struct RetryExhausted {
    /// Attempts made
    pub attempts: u32,
    /// Error of the final attempt
    pub error: AppError,
}

/// Run `f` until it succeeds, fails permanently, or the attempt budget is spent
///
/// # Errors
///
/// Returns [`RetryExhausted`] carrying the number of attempts made and the
/// final error
pub async fn retry_transaction<F, Fut, T>(mut f: F, policy: RetryPolicy) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempts < max_attempts && is_retryable(&e) => {
                let backoff = policy.backoff(attempts);
                warn!(
                    attempt = attempts,
                    max_attempts = max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transaction failed with retryable error, retrying after backoff"
                );
                sleep(backoff).await;
            }
            Err(e) => {
                error!(
                    attempts = attempts,
                    error = %e,
                    "Transaction failed"
                );
                return Err(RetryExhausted { attempts, error: e });
            }
        }
    }
}

/// Whether a failure is transient
///
/// Only store failures qualify. Within those, constraint violations and
/// permission problems are permanent; everything else (locks, busy
/// timeouts, dropped connections) is retried.
#[must_use]
pub fn is_retryable(error: &AppError) -> bool {
    if error.code != ErrorCode::DatabaseError {
        return false;
    }
    let message = error.message.to_lowercase();
    let permanent = [
        "unique constraint",
        "foreign key constraint",
        "check constraint",
        "not null constraint",
        "permission denied",
        "no such table",
    ];
    !permanent.iter().any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_transaction(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::database("database is locked"))
                } else {
                    Ok(7)
                }
            },
            fast(3),
        )
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reports_attempts_when_exhausted() {
        let exhausted = retry_transaction(
            || async { Err::<(), _>(AppError::database("database is locked")) },
            fast(3),
        )
        .await
        .unwrap_err();

        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.error.code, ErrorCode::DatabaseError);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let exhausted = retry_transaction(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AppError::database("UNIQUE constraint failed: turns.id"))
            },
            fast(5),
        )
        .await
        .unwrap_err();

        assert_eq!(exhausted.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn test_only_database_errors_retry() {
        assert!(is_retryable(&AppError::database("database is locked")));
        assert!(!is_retryable(&AppError::permission_denied("nope")));
        assert!(!is_retryable(&AppError::not_found("Turn")));
    }
}
