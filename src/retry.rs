//! Bounded retry and timeout helpers for calls to external services.
//!
//! Backoff doubles from `base` on each attempt (1s, 2s, 4s, ... with the
//! default base), capped at 2^5 × base.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

use crate::config::LimitsConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self { max_retries, base }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(limits.max_retries, Duration::from_millis(limits.retry_base_ms))
    }

    /// Delay before attempt `attempt` (1-based retry number).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * (1u32 << (attempt - 1).min(5))
    }
}

/// Retry and timeout settings for vector-store and object-store calls.
#[derive(Debug, Clone, Copy)]
pub struct CallBounds {
    pub policy: RetryPolicy,
    pub store_timeout: Duration,
    pub object_timeout: Duration,
}

impl CallBounds {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            policy: RetryPolicy::from_limits(limits),
            store_timeout: Duration::from_secs(limits.store_timeout_secs),
            object_timeout: Duration::from_secs(limits.object_timeout_secs),
        }
    }

    /// A vector-store call, retried.
    pub async fn store<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry(self.policy, self.store_timeout, what, op).await
    }

    /// An object-store call, retried.
    pub async fn object<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry(self.policy, self.object_timeout, what, op).await
    }
}

/// Await `fut`, failing with a descriptive error after `limit`.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} timed out after {:?}", what, limit)),
    }
}

/// Run an idempotent operation with a per-attempt timeout and exponential backoff.
pub async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    limit: Duration,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay(attempt)).await;
        }

        match with_timeout(limit, what, op()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "{} failed", what);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} failed after retries", what)))
}

/// Like [`retry`], but only repeats failures `retryable` accepts.
pub async fn retry_if<T, F, Fut, P>(
    policy: RetryPolicy,
    limit: Duration,
    what: &str,
    retryable: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&anyhow::Error) -> bool,
{
    let mut attempt = 0;
    loop {
        match with_timeout(limit, what, op()).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && retryable(&e) => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "{} failed, retrying", what);
                tokio::time::sleep(policy.delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy::new(10, Duration::from_secs(1));
        assert_eq!(p.delay(1), Duration::from_secs(1));
        assert_eq!(p.delay(3), Duration::from_secs(4));
        assert_eq!(p.delay(9), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out = retry(fast(), Duration::from_secs(1), "op", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("flaky"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = retry(fast(), Duration::from_secs(1), "op", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("down"))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_if_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = retry_if(
            fast(),
            Duration::from_secs(1),
            "op",
            |e| e.to_string().contains("busy"),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow!("bad request"))
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("bad request"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let err = with_timeout(Duration::from_millis(5), "slow op", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
