//! Backoff delays for transient failures
//!
//! Capped exponential backoff with optional jitter, used by the pool client
//! between attempts that failed with a server error or a timeout.

use rand::Rng;
use std::time::Duration;

/// Configuration for backoff between retries
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (1.0 gives a fixed delay)
    pub multiplier: f64,

    /// Whether to add up to one extra delay of random jitter
    pub use_jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same delay every time, no jitter
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            use_jitter: false,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Calculate delay for a given retry number (0-indexed)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(retry.min(i32::MAX as u32) as i32);

        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // gen_range panics on an empty range
        let delay_ms = if self.use_jitter && delay_ms > 0.0 {
            delay_ms + rand::thread_rng().gen_range(0.0..delay_ms)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(8));
        assert!(config.use_jitter);
    }

    #[test]
    fn test_exponential_without_jitter() {
        let config = BackoffConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
            .with_jitter(false);

        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(800));
        // Capped
        assert_eq!(config.calculate_delay(4), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_below_double() {
        let config = BackoffConfig::new().with_initial_delay(Duration::from_millis(100));
        for _ in 0..50 {
            let delay = config.calculate_delay(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(200));
        }
    }

    #[test]
    fn test_zero_delay_with_jitter() {
        let config = BackoffConfig::new().with_initial_delay(Duration::ZERO);
        assert_eq!(config.calculate_delay(3), Duration::ZERO);
    }

    #[test]
    fn test_fixed() {
        let config = BackoffConfig::fixed(Duration::from_secs(2));
        assert_eq!(config.calculate_delay(0), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(5), Duration::from_secs(2));
    }
}
