use super::ApiError;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Exponential backoff for idempotent control-plane reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (0-based): base * 2^attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last error is returned on exhaustion.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {}/{} failed: {}. Retrying in {:?}",
                    what,
                    attempt + 1,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!("{}: all {} attempts failed: {}", what, attempts, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<(), ApiError> = with_retry(&RetryPolicy::default(), "list nodes", || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(ApiError::Connectivity(format!("refused #{n}")))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ApiError::Connectivity(msg)) => assert_eq!(msg, "refused #3"),
            other => panic!("unexpected result: {other:?}"),
        }
        // 1s + 2s of backoff between the three attempts
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = with_retry(&RetryPolicy::default(), "status", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::Timeout)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), ApiError> = with_retry(&RetryPolicy::default(), "nodes", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Unauthorized)
            }
        })
        .await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
