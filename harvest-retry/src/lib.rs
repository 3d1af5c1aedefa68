//! Retry and backoff helpers for harvest storage clients
//!
//! Operations are closures returning boxed futures. Each attempt reports
//! whether a failure is worth retrying by returning [`RetryError::Transient`]
//! or [`RetryError::Permanent`]; delays between attempts come from a
//! [`backoff::ExponentialBackoff`] policy.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Attempts made by [`with_backoff`]
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' exceeded maximum retry attempts ({attempts}): {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: usize,
        source: BoxError,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: BoxError,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: BoxError,
    },
}

impl RetryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RetryError::Transient { .. })
    }

    /// The error reported by the last attempt
    pub fn into_source(self) -> BoxError {
        match self {
            RetryError::MaxRetriesExceeded { source, .. }
            | RetryError::Transient { source, .. }
            | RetryError::Permanent { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Boxed future for retry operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RetryResult<T>> + Send + 'a>>;

/// Execute an operation with the default policy and attempt limit
pub async fn with_backoff<F, T>(op_name: &'static str, f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    with_custom_backoff(op_name, default_backoff_policy(), DEFAULT_MAX_ATTEMPTS, f).await
}

/// Execute an operation with a custom backoff policy
///
/// `f` receives the 1-based attempt number. A permanent error is returned
/// as-is on the attempt that produced it. Transient errors are retried until
/// `max_attempts` is reached or the policy's elapsed-time budget runs out,
/// whichever comes first.
pub async fn with_custom_backoff<F, T>(
    op_name: &'static str,
    mut policy: ExponentialBackoff,
    max_attempts: usize,
    mut f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    let max_attempts = max_attempts.max(1);
    policy.reset();
    let mut attempt = 1;

    loop {
        debug!(operation = op_name, attempt, "Attempting operation");

        let err = match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = op_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err @ RetryError::Transient { .. }) => err,
            Err(err) => {
                warn!(operation = op_name, attempt, error = %err, "Operation failed permanently");
                return Err(err);
            }
        };

        let delay = if attempt < max_attempts {
            policy.next_backoff()
        } else {
            None
        };

        let Some(delay) = delay else {
            warn!(operation = op_name, attempt, error = %err, "Giving up on operation");
            return Err(RetryError::MaxRetriesExceeded {
                operation: op_name,
                attempts: attempt,
                source: err.into_source(),
            });
        };

        warn!(
            operation = op_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Operation failed, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(feature = "async-rt")]
async fn sleep(delay: Duration) {
    tokio::time::sleep(delay).await;
}

#[cfg(not(feature = "async-rt"))]
async fn sleep(delay: Duration) {
    std::thread::sleep(delay);
}

/// Default backoff policy for general operations
pub fn default_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(Some(Duration::from_secs(30)))
        .with_multiplier(2.0)
        .build()
}

/// Backoff policy for object-store puts
pub fn object_store_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(60)))
        .with_multiplier(1.5)
        .build()
}

/// Helper macro for creating transient errors
#[macro_export]
macro_rules! transient_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Transient {
            operation: $op,
            source: Box::new($err),
        }
    };
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: $op,
            source: Box::new($err),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn refused() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused")
    }

    fn fast_policy() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(1))
            .with_max_interval(Duration::from_millis(2))
            .with_max_elapsed_time(None)
            .build()
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let result = with_backoff("test_op", |_attempt| Box::pin(async { Ok("success") })).await;

        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = with_backoff("test_op", move |_attempt| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if count < 2 {
                    Err(transient_error!("test_op", refused()))
                } else {
                    Ok("success")
                }
            })
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result: RetryResult<&str> = with_custom_backoff("test_op", fast_policy(), 5, move |_| {
            attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Err(permanent_error!(
                    "test_op",
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied")
                ))
            })
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts() {
        let result: RetryResult<()> = with_custom_backoff("test_op", fast_policy(), 4, |attempt| {
            Box::pin(async move {
                Err(transient_error!(
                    "test_op",
                    std::io::Error::new(std::io::ErrorKind::TimedOut, format!("attempt {attempt}"))
                ))
            })
        })
        .await;

        match result {
            Err(RetryError::MaxRetriesExceeded {
                attempts, source, ..
            }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source.to_string(), "attempt 4");
            }
            other => panic!("Expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_attempt_never_sleeps() {
        let result: RetryResult<()> = with_custom_backoff(
            "test_op",
            object_store_backoff_policy(),
            1,
            |_| Box::pin(async { Err(transient_error!("test_op", refused())) }),
        )
        .await;

        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { attempts: 1, .. })
        ));
    }
}
