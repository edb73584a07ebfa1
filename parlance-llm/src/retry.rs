//! Jittered exponential backoff.

use rand::Rng;
use std::time::Duration;

use parlance_core::RetryConfig;

/// Iterator of backoff delays: full jitter over an exponentially growing
/// window, capped at `max_backoff`. Yields `max_attempts - 1` delays (no
/// sleep after the final attempt).
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or None when attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let exponent = (self.attempt - 1) as i32;
        let window = self.config.initial_backoff.as_secs_f64()
            * self.config.backoff_multiplier.powi(exponent);
        let capped = window.min(self.config.max_backoff.as_secs_f64());
        let jittered = rand::thread_rng().gen_range(0.0..=capped);
        Some(Duration::from_secs_f64(jittered))
    }

    /// Attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yields_one_less_than_max_attempts() {
        let mut backoff = Backoff::new(RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        });
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_delays_respect_cap() {
        let config = RetryConfig {
            max_attempts: 20,
            initial_backoff: Duration::from_millis(800),
            max_backoff: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        };
        let mut backoff = Backoff::new(config.clone());
        while let Some(delay) = backoff.next_delay() {
            assert!(delay <= config.max_backoff);
        }
    }

    #[test]
    fn test_zero_attempts_yields_nothing() {
        let mut backoff = Backoff::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        });
        assert!(backoff.next_delay().is_none());
    }
}
