use std::time::Duration;

use crate::transport::HttpFailure;

/// Retry settings for opening the download.
///
/// Uploads and callbacks are never retried: the upload consumes the source
/// stream, and a repeated callback would break exactly-once delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Whether `failure` on attempt `attempt` (0-based) should be retried.
    pub fn should_retry(&self, attempt: u32, failure: &HttpFailure) -> bool {
        attempt < self.max_retries && failure.is_retryable()
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        retry_delay(attempt, self.backoff)
    }
}

/// Exponential backoff: `base * 2^retry_count`, saturating on overflow.
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(retry_count))
}
