//! `RetryPolicy` — exponential backoff with jitter, grounded on the
//! teacher's `langgraph-core` retry policy. Not named by the distilled
//! spec but implied by `ErrorAction::Retry` (spec §4.3 step 7): something
//! has to decide how long to wait between attempts.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `base * multiplier^attempt`, capped at `max_delay`,
/// with up to `jitter_ratio` of the delay added as uniform random jitter to
/// avoid thundering-herd retries across concurrent runs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait before the given (zero-indexed) retry attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter_ratio * rand::thread_rng().gen_range(0.0..=1.0);
        Duration::from_secs_f64(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy { max_attempts: 2, ..Default::default() };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn delay_grows_with_attempt_and_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_ratio: 0.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(5), Duration::from_millis(500));
    }
}
