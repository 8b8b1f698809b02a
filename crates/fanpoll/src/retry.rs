//! Retry policy for control-store operations
//!
//! The control store is retried indefinitely with a fixed delay. The policy
//! is a value so callers never inline their own sleep loops.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently an operation is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up (`None` = never give up)
    pub max_attempts: Option<u32>,
    /// Delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Retry forever with a constant delay
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// Retry at most `max_attempts` times with a constant delay
    pub fn limited(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
        }
    }

    /// Run `op` until it succeeds or the attempts are exhausted
    ///
    /// Every failure is logged with its attempt number. The last error is
    /// returned once a limited policy runs out of attempts.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if matches!(self.max_attempts, Some(max) if attempt >= max) {
                        return Err(e);
                    }
                    warn!(
                        attempt,
                        error = %e,
                        "{} failed, retrying in {}s",
                        label,
                        self.delay.as_secs_f64()
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fixed_policy_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(Duration::from_millis(1));

        let result: Result<u32, String> = policy
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 {
                    Err(format!("attempt {} failed", n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_limited_policy_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::limited(3, Duration::from_millis(1));

        let result: Result<(), String> = policy
            .run("always failing", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {}", n))
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_limited_policy_makes_at_least_one_attempt() {
        assert_eq!(
            RetryPolicy::limited(0, Duration::ZERO).max_attempts,
            Some(1)
        );
    }
}
