use std::future::Future;
use std::time::Duration;

use crate::services::clock::Sleeper;
use crate::services::videos::ApiError;

/// Bounded exponential backoff for retryable API errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Longest `Retry-After` hint that is honoured.
    fn max_hint(&self) -> Duration {
        self.max_delay.saturating_mul(4)
    }

    /// Delay before retry number `retry` (1-based). A server-provided
    /// `Retry-After` wins when it is longer, capped at four times `max_delay`.
    pub fn delay_for(&self, retry: u32, error: &ApiError) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        match error.retry_after() {
            Some(hint) if hint > backoff => hint.min(self.max_hint()),
            _ => backoff,
        }
    }
}

/// Run `op`, retrying while `should_retry` accepts the error and the budget
/// lasts.
pub async fn with_retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    should_retry: P,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    P: Fn(&ApiError) -> bool,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retry < policy.max_retries && should_retry(&e) => {
                retry += 1;
                let delay = policy.delay_for(retry, &e);
                tracing::warn!(
                    error = %e,
                    retry = retry,
                    delay_ms = delay.as_millis() as u64,
                    "Videos API call failed, retrying"
                );
                sleeper.sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Retry predicate for idempotent calls.
pub fn retryable(error: &ApiError) -> bool {
    error.is_retryable()
}

/// Retry predicate for job creation: only retry when the service refused
/// the request outright, so a lost response never creates a duplicate job.
pub fn rate_limited_only(error: &ApiError) -> bool {
    matches!(error, ApiError::RateLimited { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_capped_and_honours_retry_after() {
        let policy = RetryPolicy::default();
        let transient = ApiError::Transient("503".into());
        assert_eq!(policy.delay_for(1, &transient), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, &transient), Duration::from_secs(1));
        assert_eq!(policy.delay_for(10, &transient), Duration::from_secs(8));

        let limited = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(20)),
            message: "slow down".into(),
        };
        assert_eq!(policy.delay_for(1, &limited), Duration::from_secs(20));

        let day = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(86_400)),
            message: "come back tomorrow".into(),
        };
        assert_eq!(policy.delay_for(1, &day), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let clock = ManualClock::new(Utc::now());
        let attempts = AtomicU32::new(0);

        let result = with_retry(&RetryPolicy::default(), &clock, retryable, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiError::Transient("502".into()))
            } else {
                Ok("done")
            }
        })
        .await;

        tokio_test::assert_ok!(result);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let clock = ManualClock::new(Utc::now());
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };

        let result: Result<(), ApiError> = with_retry(&policy, &clock, retryable, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Transient("502".into()))
        })
        .await;

        tokio_test::assert_err!(result);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_submit_predicate_skips_transient() {
        let clock = ManualClock::new(Utc::now());
        let attempts = AtomicU32::new(0);

        let result: Result<(), ApiError> =
            with_retry(&RetryPolicy::default(), &clock, rate_limited_only, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Transient("connection reset".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }
}
