//! Reconnection Policy
//!
//! Fixed-delay reconnection for upstream links. Every failed attempt waits
//! the same delay, with no jitter and no attempt limit: a link retries for
//! as long as the process runs.

use std::time::Duration;

use crate::infrastructure::config::DEFAULT_RECONNECT_DELAY;

/// Fixed-delay reconnection policy.
///
/// # Example
///
/// ```rust
/// use market_relay::infrastructure::feed::ReconnectPolicy;
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(Duration::from_secs(3));
///
/// assert_eq!(policy.next_delay(), Duration::from_secs(3));
/// assert_eq!(policy.next_delay(), Duration::from_secs(3));
/// assert_eq!(policy.attempt_count(), 2);
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    attempt_count: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Create a policy with the given fixed delay.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            attempt_count: 0,
        }
    }

    /// Record a failed attempt and get the delay before the next one.
    #[must_use]
    pub const fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.delay
    }

    /// Reset the attempt count after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Consecutive failed attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u64 {
        self.attempt_count
    }

    /// The fixed delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_three_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(), Duration::from_secs(3));
        assert_eq!(policy.attempt_count(), 0);
    }

    #[test]
    fn delay_never_grows() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100));

        for attempt in 1..=50 {
            assert_eq!(policy.next_delay(), Duration::from_millis(100));
            assert_eq!(policy.attempt_count(), attempt);
        }
    }

    #[test]
    fn reset_clears_attempts() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }
}
