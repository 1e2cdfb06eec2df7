use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

/// Transfer-level retry ceiling and delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per transfer, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Linear backoff capped at `max_delay`; `attempt` is 1-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the ceiling is
/// reached. Every transient failure is logged with its attempt number.
pub async fn retry_transfer<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let ceiling = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_transient() {
            return Err(err);
        }
        if attempt >= ceiling {
            tracing::warn!("Error {label}: {err}");
            return Err(FetchError::Exhausted {
                attempts: attempt,
                last_error: err.to_string(),
            });
        }
        tracing::warn!("Retry {attempt}/{ceiling} {label}: {err}");
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn delay_is_linear_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 15,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(9), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_transfer(
            &RetryPolicy::immediate(5),
            "x",
            &CancellationToken::new(),
            |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FetchError::Transport("reset".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), FetchError> = retry_transfer(
            &RetryPolicy::immediate(15),
            "x",
            &CancellationToken::new(),
            |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Incomplete {
                        expected: 10,
                        received: 3,
                    })
                }
            },
        )
        .await;
        assert_matches!(result, Err(FetchError::Exhausted { attempts: 15, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), FetchError> = retry_transfer(
            &RetryPolicy::immediate(15),
            "x",
            &CancellationToken::new(),
            |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::InvalidLocation("::".to_string()))
                }
            },
        )
        .await;
        assert_matches!(result, Err(FetchError::InvalidLocation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), FetchError> =
            retry_transfer(&RetryPolicy::immediate(3), "x", &cancel, |_| async {
                Ok(())
            })
            .await;
        assert_eq!(result, Err(FetchError::Cancelled));
    }
}
