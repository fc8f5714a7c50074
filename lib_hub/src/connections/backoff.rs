//! Reconnect pacing for the broker connection.

use std::time::Duration;

/// Delay bounds for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl BackoffPolicy {
    /// Retries forever between `base` and `max`.
    pub fn unbounded(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            max_retries: None,
        }
    }

    /// Same bounds, giving up after `retries` consecutive failures.
    pub fn with_max_retries(self, retries: u32) -> Self {
        Self {
            max_retries: Some(retries),
            ..self
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(1000), Duration::from_millis(60000))
    }
}

/// Doubling delay state: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Starts at attempt zero.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay to wait before the next attempt, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.policy.max_retries {
            if self.attempt >= limit {
                return None;
            }
        }
        let factor = 1u32 << self.attempt.min(20);
        let delay = self.policy.base.saturating_mul(factor).min(self.policy.max);
        self.attempt += 1;
        Some(delay)
    }

    /// Consecutive failures so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Clears the failure streak after a successful round trip.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = Backoff::new(BackoffPolicy::unbounded(
            Duration::from_millis(100),
            Duration::from_millis(700),
        ));
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 700, 700, 700]);
        assert_eq!(backoff.attempt(), 6);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut backoff = Backoff::new(BackoffPolicy::default().with_max_retries(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(BackoffPolicy::unbounded(
            Duration::from_secs(1),
            Duration::from_secs(60),
        ));
        for _ in 0..100 {
            assert!(backoff.next_delay().unwrap() <= Duration::from_secs(60));
        }
    }
}
