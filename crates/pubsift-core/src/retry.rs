//! Retry with exponential backoff for transient upstream failures

use std::fmt::Display;
use std::time::Duration;

use crate::stream::{StreamError, http_config};

/// Error classification shared by every client error type.
pub trait Retryable {
    /// Whether repeating the same call may succeed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for StreamError {
    fn is_retryable(&self) -> bool {
        StreamError::is_retryable(self)
    }
}

/// Bounded exponential backoff: `base * 2^attempt` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Retry budget from the global [`HttpConfig`](crate::HttpConfig), 2s/4s/8s... delays.
    pub fn from_http_config() -> Self {
        Self {
            max_retries: http_config().max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    /// No waiting between attempts (tests, in-memory backends).
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_http_config()
    }
}

/// Retry a fallible operation with exponential backoff.
///
/// Retryable errors are logged at debug level and repeated up to
/// `policy.max_retries` times; anything else returns immediately.
pub fn retry_with_backoff<T, E>(
    label: &str,
    policy: RetryPolicy,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E>
where
    E: Retryable + Display,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                attempt += 1;
                log::debug!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying...",
                    policy.max_retries
                );
                std::thread::sleep(policy.backoff(attempt));
            }
            Err(e) => {
                log::warn!("{label}: giving up: {e}");
                return Err(e);
            }
        }
    }
}
