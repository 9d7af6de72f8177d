//! Retry configuration with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule. Attempt limits live with the caller.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for the given attempt number (0-indexed), without jitter.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponents past 64 overflow any useful delay anyway.
        let exponent = attempt.min(64) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Calculate the delay for the given attempt with random jitter, capped at `max_delay`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            let millis = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
            Duration::from_millis(millis)
        };

        (self.delay_for_attempt(attempt) + jitter).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig::default();

        // First retry: 1s
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        // Second retry: 2s
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        // Third retry: 4s
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        // Fourth retry: 8s
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_max_delay() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(7200),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        };

        // Should be capped at max_delay
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(7200));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(7200));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
            ..Default::default()
        };

        for _ in 0..100 {
            let delay = config.jittered_delay(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_jitter_respects_cap() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_secs(5),
            ..Default::default()
        };

        for _ in 0..20 {
            assert_eq!(config.jittered_delay(3), Duration::from_secs(10));
        }
    }
}
