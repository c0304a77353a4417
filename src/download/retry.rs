//! Retry decisions for failed segment transfers.
//!
//! Failures are classified into a [`FailureType`]; the [`RetryPolicy`]
//! then decides whether another attempt is worthwhile. Delays are fixed
//! (`DownloadOptions::retry_delay`) rather than exponential.

use std::time::Duration;

use tracing::debug;

use super::DownloadError;
use super::options::DownloadOptions;

/// Classification of download failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection reset.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, local I/O error, invalid URL.
    Permanent,

    /// Cancellation; never retried and never reported as a failure.
    Cancelled,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt this will be (1-indexed, so the first retry is attempt 2).
        attempt: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Fixed-delay retry budget for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    max_retries: u32,
    /// Delay between attempts.
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries, `delay` apart.
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Builds the policy described by a download's options.
    #[must_use]
    pub fn from_options(options: &DownloadOptions) -> Self {
        Self::new(options.retry_attempts, options.retry_delay)
    }

    /// Total attempts including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decides what to do after `attempt` (1-indexed) failed with `failure_type`.
    #[must_use]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Cancelled => {
                return RetryDecision::DoNotRetry {
                    reason: "cancelled".to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts() {
            debug!(attempt, max = self.max_attempts(), "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts()),
            };
        }

        RetryDecision::Retry {
            delay: self.delay,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a download error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, Network, RangeNotHonored, Incomplete | Transient |
/// | HTTP 408, 429, 5xx | Transient |
/// | Other HTTP statuses | Permanent |
/// | Io, InvalidUrl, InvalidOptions, Conflict, MissingSegment, Worker | Permanent |
/// | Cancelled | Cancelled |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. }
        | DownloadError::Network { .. }
        | DownloadError::RangeNotHonored { .. }
        | DownloadError::Incomplete { .. } => FailureType::Transient,
        DownloadError::Cancelled => FailureType::Cancelled,
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::InvalidOptions { .. }
        | DownloadError::Conflict { .. }
        | DownloadError::MissingSegment { .. }
        | DownloadError::Worker { .. } => FailureType::Permanent,
    }
}

/// Server-requested wait from a `Retry-After: <seconds>` header, if any.
///
/// HTTP-date values are ignored and fall back to the fixed delay.
#[must_use]
pub fn retry_after_delay(error: &DownloadError) -> Option<Duration> {
    match error {
        DownloadError::HttpStatus {
            retry_after: Some(value),
            ..
        } => value.trim().parse::<u64>().ok().map(Duration::from_secs),
        _ => None,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 | 429 => FailureType::Transient,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_failure_retries_with_fixed_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        assert_eq!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry {
                delay: Duration::from_millis(250),
                attempt: 2
            }
        );
        assert_eq!(
            policy.should_retry(FailureType::Transient, 3),
            RetryDecision::Retry {
                delay: Duration::from_millis(250),
                attempt: 4
            }
        );
    }

    #[test]
    fn test_budget_exhausted_after_retries() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 4);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 4),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_permanent_and_cancelled_never_retry() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Cancelled, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_from_options_uses_retry_settings() {
        let options = DownloadOptions::new("https://example.com/a", "/tmp/a")
            .with_retry(2, Duration::from_secs(1));
        let policy = RetryPolicy::from_options(&options);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_classify_http_statuses() {
        let url = "https://example.com/file";
        assert_eq!(
            classify_error(&DownloadError::http_status(url, 404)),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::http_status(url, 403)),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::http_status(url, 503)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::http_status(url, 429)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::http_status(url, 408)),
            FailureType::Transient
        );
    }

    #[test]
    fn test_retry_after_seconds_parsed() {
        let error = DownloadError::http_status_with_retry_after(
            "https://example.com",
            429,
            Some("7".to_string()),
        );
        assert_eq!(retry_after_delay(&error), Some(Duration::from_secs(7)));

        let dated = DownloadError::http_status_with_retry_after(
            "https://example.com",
            503,
            Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
        );
        assert_eq!(retry_after_delay(&dated), None);
        assert_eq!(retry_after_delay(&DownloadError::Cancelled), None);
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_error(&DownloadError::timeout("https://example.com")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::range_not_honored("https://example.com", 10)),
            FailureType::Transient
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            classify_error(&DownloadError::io("/tmp/x", io)),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::Cancelled),
            FailureType::Cancelled
        );
    }
}
