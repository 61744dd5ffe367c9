//! # Conflict Retry
//!
//! Bounded optimistic-concurrency retry around read-modify-write calls.
//! Only write conflicts are retried; every other failure is returned as-is.

use crate::config::ControllerConfig;
use crate::controller::errors::is_conflict;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            attempts: config.conflict_retry_attempts.max(1),
            delay: config.conflict_retry_delay(),
        }
    }
}

/// Run `op` until it succeeds, fails with something other than a conflict,
/// or the attempts run out
///
/// `op` must re-read the object it writes on every call.
pub async fn retry_on_conflict<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if is_conflict(&e) && attempt < attempts => {
                debug!(attempt, attempts, "write conflict, retrying");
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::errors::api_error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_on_conflict(policy(5), || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(api_error(409, "Conflict", "stale"))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.ok(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_on_conflict(policy(3), || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(api_error(409, "Conflict", "stale"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_on_conflict(policy(5), || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(api_error(403, "Forbidden", "denied"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
