//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Delay schedule for one reconnect episode.
///
/// The base interval doubles after every failed attempt (up to `max`), and
/// each sleep adds a uniform jitter in `[0, max_jitter)`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    next: Duration,
    max: Duration,
    max_jitter: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration, max_jitter: Duration) -> Self {
        Self {
            next: base,
            max: max.max(base),
            max_jitter,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            Duration::from_millis(config.max_jitter_ms),
        )
    }

    /// Interval for the upcoming sleep, before jitter. Advances the schedule.
    pub fn next_interval(&mut self) -> Duration {
        let current = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        current
    }

    /// Random extra delay added on top of an interval.
    pub fn jitter(&self) -> Duration {
        let range_ms = self.max_jitter.as_millis() as u64;
        if range_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..range_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_doubles() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        assert_eq!(backoff.next_interval(), Duration::from_millis(100));
        assert_eq!(backoff.next_interval(), Duration::from_millis(200));
        assert_eq!(backoff.next_interval(), Duration::from_millis(400));
    }

    #[test]
    fn test_interval_capped() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(300),
            Duration::ZERO,
        );
        let delays: Vec<_> = (0..4).map(|_| backoff.next_interval()).collect();
        assert_eq!(delays[2], Duration::from_millis(300));
        assert_eq!(delays[3], Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_bounds() {
        let backoff = ReconnectBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_millis(1000),
        );
        for _ in 0..100 {
            assert!(backoff.jitter() < Duration::from_millis(1000));
        }
        let none = ReconnectBackoff::new(Duration::from_millis(1), Duration::from_millis(1), Duration::ZERO);
        assert_eq!(none.jitter(), Duration::ZERO);
    }
}
