//! Reconnection delays

use std::time::Duration;

/// Exponential backoff settings: `min(base * 2^(attempt - 1), max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Attempt counter for one session
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Count another retry and return its delay, or `None` once attempts are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay_for(self.attempts))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_default_sequence_stops_after_five() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();

        assert_eq!(delays, secs(&[1, 2, 4, 8, 16]));
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_reset_after_success() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        for _ in 0..3 {
            backoff.next_delay();
        }
        backoff.reset();

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 100,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        });
        assert_eq!(backoff.next_delay(), None);
    }
}
