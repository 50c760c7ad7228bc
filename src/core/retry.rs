//! Retry policy applied by the scheduler around failed runs.
//!
//! The runner itself never retries; re-running a failed task is always a
//! fresh attempt driven from outside, with bounded exponential backoff.

use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first run. 1 disables retries.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt`, doubling per attempt
    /// and capped at five minutes.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
        assert_eq!(policy.delay_for(4), Duration::from_secs(240));
        // Capped.
        assert_eq!(policy.delay_for(5), Duration::from_secs(300));
        assert_eq!(policy.delay_for(30), Duration::from_secs(300));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        // A zero config still allows the initial attempt.
        let single = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(single.max_attempts, 1);
        assert!(!single.should_retry(1));
    }
}
