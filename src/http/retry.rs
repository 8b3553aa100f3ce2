//! Retry policy with exponential backoff.
//!
//! The policy is a pure decision function of `(failure, attempt, method)`
//! so it can be exercised without a transport behind it.

use std::time::Duration;

use rand::Rng;
use reqwest::Method;

use crate::error::Error;

/// Configuration for retry behavior on one connection.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempt budget for one logical call (first try included).
    pub max_retries: u32,
    /// Base backoff in seconds; attempt `n` waits `backoff_factor * 2^(n-1)`.
    pub backoff_factor: f64,
    /// Upper bound on a single backoff sleep.
    pub max_backoff: Duration,
    /// Randomize each sleep by 0.5x-1.5x to avoid thundering herds.
    pub jitter: bool,
    /// Statuses considered transient for the methods below.
    pub retry_statuses: Vec<u16>,
    /// Methods whose requests are safe to replay on a retryable status.
    /// POST is excluded; a request can opt in with `Request::retryable`.
    pub retry_methods: Vec<Method>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_factor: 1.0,
            max_backoff: Duration::from_secs(120),
            jitter: true,
            retry_statuses: vec![429, 502, 503, 504],
            retry_methods: vec![Method::GET, Method::HEAD, Method::PUT, Method::DELETE],
        }
    }
}

/// Outcome of a retry decision for one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then try again.
    RetryAfter(Duration),
    /// Surface the failure to the caller.
    GiveUp,
}

impl RetryConfig {
    /// Single attempt, no sleeps. Useful in tests.
    pub fn disabled() -> Self {
        Self { max_retries: 1, jitter: false, ..Self::default() }
    }

    /// Decide what to do after a failed attempt.
    ///
    /// Network and timeout failures are always retryable within the
    /// budget. HTTP failures are retryable only when the status is in
    /// `retry_statuses` and the method is in `retry_methods` (or the
    /// request was explicitly marked as a replay-safe POST).
    pub fn decide(
        &self,
        failure: &Error,
        attempt: u32,
        method: &Method,
        retry_post: bool,
    ) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::GiveUp;
        }

        let retryable = match failure {
            Error::Network { .. } | Error::Timeout { .. } => true,
            Error::Http { status, .. } => {
                self.retry_statuses.contains(status)
                    && (self.retry_methods.contains(method)
                        || (*method == Method::POST && retry_post))
            }
            _ => false,
        };

        if retryable {
            RetryDecision::RetryAfter(self.backoff(attempt))
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Exponential backoff for the given (1-based) attempt number.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let seconds = self.backoff_factor.max(0.0) * 2f64.powi(exponent);
        let mut delay = Duration::from_secs_f64(seconds.min(self.max_backoff.as_secs_f64()));

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            delay = delay.mul_f64(factor);
        }

        delay
    }
}
