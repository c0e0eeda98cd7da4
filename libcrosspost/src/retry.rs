//! Retry policy
//!
//! Classifies publish failures and computes backoff. Transient failures
//! (network, timeout, server-side, rate limiting) are retried with a linear
//! backoff until the attempt budget is spent; permanent failures (auth,
//! validation) fail immediately.

use crate::error::PlatformError;

/// What the dispatcher should do with a message after a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue into the retry lane, visible again after `delay_seconds`.
    Retry { delay_seconds: i64 },
    /// Mark the content failed with this reason.
    Fail { reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_seconds: i64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_seconds: i64) -> Self {
        Self {
            max_attempts,
            base_delay_seconds,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.delivery.max_attempts,
            config.delivery.base_delay_seconds,
        )
    }

    /// Linear backoff: the delay grows with the attempt count, so the first
    /// retry waits one base interval, the second two, and so on.
    pub fn backoff_seconds(&self, attempts: u32) -> i64 {
        self.base_delay_seconds * i64::from(attempts.max(1))
    }

    /// Decide the fate of a message whose publish attempt just failed.
    /// `attempts` counts this failure.
    pub fn decide(&self, error: &PlatformError, attempts: u32) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::Fail {
                reason: error.failure_reason().to_string(),
            };
        }

        if attempts >= self.max_attempts {
            return RetryDecision::Fail {
                reason: "max_retries_exceeded".to_string(),
            };
        }

        RetryDecision::Retry {
            delay_seconds: self.backoff_seconds(attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, 300)
    }

    #[test]
    fn test_linear_backoff() {
        let policy = policy();
        assert_eq!(policy.backoff_seconds(1), 300);
        assert_eq!(policy.backoff_seconds(2), 600);
        assert_eq!(policy.backoff_seconds(3), 900);
    }

    #[test]
    fn test_backoff_floor() {
        // Never a zero delay even if the caller passes attempts == 0
        assert_eq!(policy().backoff_seconds(0), 300);
    }

    #[test]
    fn test_transient_failure_retries_with_growing_delay() {
        let policy = policy();
        let err = PlatformError::Network("connection reset".to_string());

        assert_eq!(
            policy.decide(&err, 1),
            RetryDecision::Retry { delay_seconds: 300 }
        );
        assert_eq!(
            policy.decide(&err, 2),
            RetryDecision::Retry { delay_seconds: 600 }
        );
    }

    #[test]
    fn test_transient_failure_exhausts_budget() {
        let policy = policy();
        let err = PlatformError::Timeout("request timed out".to_string());

        assert_eq!(
            policy.decide(&err, 3),
            RetryDecision::Fail {
                reason: "max_retries_exceeded".to_string()
            }
        );
    }

    #[test]
    fn test_permanent_failure_never_retries() {
        let policy = policy();
        let err = PlatformError::Authentication("token revoked".to_string());

        assert_eq!(
            policy.decide(&err, 1),
            RetryDecision::Fail {
                reason: "auth_error".to_string()
            }
        );
    }

    #[test]
    fn test_validation_failure_reason() {
        let policy = policy();
        let err = PlatformError::Validation("body too long".to_string());

        assert_eq!(
            policy.decide(&err, 1),
            RetryDecision::Fail {
                reason: "validation_error".to_string()
            }
        );
    }
}
