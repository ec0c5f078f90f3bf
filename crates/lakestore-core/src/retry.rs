//! Retry policies for store calls.
//!
//! A policy decides whether a failed attempt should be retried, and sleeps
//! the appropriate backoff before answering yes. The engine has no separate
//! sleep step. Policies hold per-request counters and are consumed by a
//! single call; they are never shared across requests.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Decision point after a failed attempt.
///
/// `http_status` is 0 when the attempt failed without an HTTP response;
/// `transport_failure` is true in that case.
#[async_trait]
pub trait RetryPolicy: Send {
    async fn should_retry(&mut self, http_status: u16, transport_failure: bool) -> bool;
}

/// Client-configurable parameters for the exponential policy.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub factor: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_interval: Duration::from_millis(1000),
            factor: 4,
        }
    }
}

impl BackoffConfig {
    pub fn make_policy(&self) -> ExponentialBackoffPolicy {
        ExponentialBackoffPolicy::new(self.max_retries, self.initial_interval, self.factor)
    }
}

/// Wait before the single 401 retry the no-retry policies allow; the token
/// may have been refreshed under the request.
const UNAUTHORIZED_RETRY_WAIT: Duration = Duration::from_millis(100);

/// At-most-once: never retries, except one 401 retry after a short wait.
#[derive(Debug, Default)]
pub struct NoRetryPolicy {
    retried_401: bool,
}

impl NoRetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryPolicy for NoRetryPolicy {
    async fn should_retry(&mut self, http_status: u16, _transport_failure: bool) -> bool {
        if http_status == 401 && !self.retried_401 {
            self.retried_401 = true;
            tokio::time::sleep(UNAUTHORIZED_RETRY_WAIT).await;
            return true;
        }
        false
    }
}

/// Default policy for idempotent operations: geometric backoff on retryable
/// statuses and on transport failures.
///
/// Retryable: 401, 408, 429, and 5xx except 501 and 505. 3xx and other 4xx
/// are not retried.
#[derive(Debug)]
pub struct ExponentialBackoffPolicy {
    retry_count: u32,
    max_retries: u32,
    interval: Duration,
    factor: u32,
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_millis(1000), 4)
    }
}

impl ExponentialBackoffPolicy {
    pub fn new(max_retries: u32, initial_interval: Duration, factor: u32) -> Self {
        Self {
            retry_count: 0,
            max_retries,
            interval: initial_interval,
            factor,
        }
    }
}

fn is_retryable_status(http_status: u16) -> bool {
    match http_status {
        401 | 408 | 429 => true,
        501 | 505 => false,
        s => (500..600).contains(&s),
    }
}

#[async_trait]
impl RetryPolicy for ExponentialBackoffPolicy {
    async fn should_retry(&mut self, http_status: u16, transport_failure: bool) -> bool {
        if !transport_failure && !is_retryable_status(http_status) {
            return false;
        }
        if self.retry_count >= self.max_retries {
            return false;
        }
        debug!(
            http_status,
            transport_failure,
            wait_ms = self.interval.as_millis() as u64,
            retry = self.retry_count + 1,
            "retrying after backoff"
        );
        tokio::time::sleep(self.interval).await;
        self.interval *= self.factor;
        self.retry_count += 1;
        true
    }
}

/// Policy for non-idempotent operations: one 401 retry, and exponential
/// backoff on 429 only (429 is guaranteed state-preserving). Transport
/// failures are never retried since the call may have landed.
#[derive(Debug)]
pub struct NonIdempotentRetryPolicy {
    retried_401: bool,
    retry_count_429: u32,
    max_retries: u32,
    interval: Duration,
    factor: u32,
}

impl Default for NonIdempotentRetryPolicy {
    fn default() -> Self {
        Self {
            retried_401: false,
            retry_count_429: 0,
            max_retries: 4,
            interval: Duration::from_millis(1000),
            factor: 4,
        }
    }
}

impl NonIdempotentRetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryPolicy for NonIdempotentRetryPolicy {
    async fn should_retry(&mut self, http_status: u16, _transport_failure: bool) -> bool {
        if http_status == 401 && !self.retried_401 {
            self.retried_401 = true;
            tokio::time::sleep(UNAUTHORIZED_RETRY_WAIT).await;
            return true;
        }
        if http_status == 429 && self.retry_count_429 < self.max_retries {
            tokio::time::sleep(self.interval).await;
            self.interval *= self.factor;
            self.retry_count_429 += 1;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_exponential_wait_sequence() {
        let mut policy = ExponentialBackoffPolicy::default();
        let expected_ms = [1000u64, 4000, 16000, 64000];

        for expected in expected_ms {
            let before = Instant::now();
            assert!(policy.should_retry(503, false).await);
            assert_eq!(before.elapsed(), Duration::from_millis(expected));
        }
        // fifth consultation: retries exhausted, no sleep
        let before = Instant::now();
        assert!(!policy.should_retry(503, false).await);
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_exponential_not_retryable_statuses() {
        for status in [301u16, 400, 403, 404, 409, 501, 505] {
            let mut policy = ExponentialBackoffPolicy::default();
            assert!(
                !policy.should_retry(status, false).await,
                "status {status} must not be retried"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_retryable_statuses() {
        for status in [401u16, 408, 429, 500, 502, 503, 504] {
            let mut policy = ExponentialBackoffPolicy::default();
            assert!(
                policy.should_retry(status, false).await,
                "status {status} must be retried"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_retries_transport_failures() {
        let mut policy = ExponentialBackoffPolicy::default();
        assert!(policy.should_retry(0, true).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_single_401() {
        let mut policy = NoRetryPolicy::new();
        let before = Instant::now();
        assert!(policy.should_retry(401, false).await);
        assert_eq!(before.elapsed(), Duration::from_millis(100));
        assert!(!policy.should_retry(401, false).await);
    }

    #[tokio::test]
    async fn test_no_retry_everything_else() {
        let mut policy = NoRetryPolicy::new();
        assert!(!policy.should_retry(503, false).await);
        assert!(!policy.should_retry(0, true).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_idempotent_retries_429_only() {
        let mut policy = NonIdempotentRetryPolicy::new();
        assert!(!policy.should_retry(503, false).await);
        assert!(!policy.should_retry(0, true).await);

        for expected in [1000u64, 4000, 16000, 64000] {
            let before = Instant::now();
            assert!(policy.should_retry(429, false).await);
            assert_eq!(before.elapsed(), Duration::from_millis(expected));
        }
        assert!(!policy.should_retry(429, false).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_idempotent_single_401() {
        let mut policy = NonIdempotentRetryPolicy::new();
        assert!(policy.should_retry(401, false).await);
        assert!(!policy.should_retry(401, false).await);
    }

    #[test]
    fn test_retryable_status_boundaries() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(599));
        assert!(!is_retryable_status(501));
        assert!(!is_retryable_status(505));
        assert!(!is_retryable_status(600));
        assert!(!is_retryable_status(499));
    }
}
