//! Retry with exponential backoff for transient failures.
//!
//! Both the fetcher and the embedder wrap their network calls in the same
//! [`RetryPolicy`] rather than inlining backoff loops per call site. Only
//! errors classified transient by [`PipelineError::is_transient`] are
//! retried; everything else propagates on the first attempt.

use std::time::Duration;

use tracing::debug;

use crate::types::PipelineError;

/// Bounded exponential backoff policy.
///
/// Attempt `n` (zero-based) sleeps `base_delay * 2^n` before the next try,
/// so the default policy of two retries over a 1 second base waits 1s then
/// 2s. A provider-supplied `retry_after` hint is honoured when it is longer
/// than the computed backoff.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Runs `operation`, retrying transient failures until the retry budget
    /// is exhausted. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let backoff = self.delay_for(attempt);
                    let delay = match &err {
                        PipelineError::RateLimited {
                            retry_after: Some(hint),
                        } => backoff.max(*hint),
                        _ => backoff,
                    };
                    debug!(attempt, ?delay, error = %err, "retrying transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result = policy
            .run(|| async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::Timeout)
                } else {
                    Ok(42u32)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = policy
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Network("connection refused".into()))
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Network(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_fail_fast() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = policy
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Upstream { status: 404 })
            })
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::Upstream { status: 404 })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_extends_backoff() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();
        let result = policy
            .run(|| async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::RateLimited {
                        retry_after: Some(Duration::from_secs(5)),
                    })
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
        // Two rate-limit rounds honouring the 5s hint each.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
