use std::time;

use http::StatusCode;

#[derive(Copy, Clone, Debug)]
/// How many times the `Notifier` re-issues a failed request, and how long it waits in between.
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    max_retries: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            max_retries,
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// A policy that retries `max_retries` times without waiting. Handy in tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, 1, time::Duration::ZERO, None)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt is allowed after `retries_done` retries.
    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Calculate the time to wait before retry number `attempt` (0-based).
    /// A `preferred_retry_interval`, e.g. from a Retry-After header, wins over the
    /// computed backoff when longer, but never over `maximum_interval`.
    pub fn retry_interval(
        &self,
        attempt: u32,
        preferred_retry_interval: Option<time::Duration>,
    ) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt));

        match (preferred_retry_interval, self.maximum_interval) {
            (Some(duration), Some(max_interval)) => std::cmp::min(
                std::cmp::max(std::cmp::min(candidate_interval, max_interval), duration),
                max_interval,
            ),
            (Some(duration), None) => std::cmp::max(candidate_interval, duration),
            (None, Some(max_interval)) => std::cmp::min(candidate_interval, max_interval),
            (None, None) => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_millis(250),
            maximum_interval: Some(time::Duration::from_secs(2)),
        }
    }
}

/// Server-side statuses worth another attempt. Client errors are final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}
