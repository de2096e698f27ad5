//! Bounded polling for operations the cluster completes asynchronously.
//!
//! Index builds and scope, collection and group creation are eventually
//! consistent: the create call returns before the object is visible. Resources
//! poll with [`retry_until`] until it shows up or the policy times out.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Outcome of one polling attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Done; stop polling.
    Ready(T),
    /// Not there yet; try again after the interval.
    Retry(ProviderError),
    /// Stop polling and fail.
    Fail(ProviderError),
}

/// How long to poll and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up after this long.
    pub timeout: Duration,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Pause between attempts unless overridden.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    /// Timeout used when waiting for a newly created object.
    pub const CREATE_TIMEOUT: Duration = Duration::from_secs(300);

    /// A policy with explicit bounds.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// The policy resources use after a create call.
    pub fn create() -> Self {
        Self::new(Self::CREATE_TIMEOUT, Self::DEFAULT_INTERVAL)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::create()
    }
}

/// Call `op` until it returns [`Attempt::Ready`] or [`Attempt::Fail`].
///
/// When `policy.timeout` elapses first, the result is
/// [`ProviderError::DeadlineExceeded`] carrying the last retryable error.
/// `op` always runs at least once.
pub async fn retry_until<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Attempt::Ready(value) => {
                debug!(what, attempt, "Polling finished");
                return Ok(value);
            }
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(err) => {
                if start.elapsed() + policy.interval > policy.timeout {
                    return Err(ProviderError::DeadlineExceeded(format!(
                        "timed out after {:?} waiting for {}: {}",
                        policy.timeout, what, err
                    )));
                }
                if attempt % 10 == 0 {
                    warn!(what, attempt, error = %err, "Still waiting");
                } else {
                    debug!(what, attempt, error = %err, "Not ready, retrying");
                }
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(200), Duration::from_millis(5))
    }

    #[test]
    fn test_create_policy() {
        let policy = RetryPolicy::create();
        assert_eq!(policy.timeout, Duration::from_secs(300));
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(RetryPolicy::default(), policy);
    }

    #[tokio::test]
    async fn test_ready_after_retries() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value = retry_until(fast(), "scope", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Attempt::Retry(ProviderError::NotFound("scope".into()))
            } else {
                Attempt::Ready(n)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fail_stops_immediately() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let err = retry_until(fast(), "index", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Attempt::<()>::Fail(ProviderError::Sdk("index is primary".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ProviderError::Sdk(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_carries_last_error() {
        let err = retry_until(fast(), "collection airline", || async {
            Attempt::<()>::Retry(ProviderError::NotFound("cannot find collection with name: airline".into()))
        })
        .await
        .unwrap_err();

        match err {
            ProviderError::DeadlineExceeded(msg) => {
                assert!(msg.contains("collection airline"));
                assert!(msg.contains("cannot find collection with name: airline"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_runs_once() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy::new(Duration::ZERO, Duration::from_millis(1));

        let result = retry_until(policy, "group", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Attempt::<()>::Retry(ProviderError::NotFound("group".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
