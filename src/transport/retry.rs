//! Bounded retry policy for transient transport failures.

use std::time::Duration;

/// Retries allowed after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Fixed delay between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// How many times, and how far apart, a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Fixed back-off between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self { max_retries, backoff }
    }

    /// Same retry bound with no delay between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    /// Upper bound on physical attempts per logical call.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a transient failure on the given 1-based attempt may be retried.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff, Duration::from_secs(2));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[test]
    fn test_should_retry_bound() {
        let policy = RetryPolicy::immediate(2);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
        assert_eq!(policy.backoff, Duration::ZERO);
    }
}
