//! Retry delay policy for the completion client.
//!
//! Every retry waits the same base delay; a rate-limited attempt waits the
//! longer rate-limit delay instead. Delays never grow with the attempt number.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_rate_limit_delay_ms() -> u64 {
    10_000
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Delay between attempts in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay after a rate-limited (HTTP 429) attempt in milliseconds.
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that retries without sleeping, for tests.
    #[must_use]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            rate_limit_delay_ms: 0,
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the rate-limit delay.
    #[must_use]
    pub fn with_rate_limit_delay_ms(mut self, delay: u64) -> Self {
        self.rate_limit_delay_ms = delay;
        self
    }

    /// Attempts that will actually be made (at least one).
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Delay to wait after a failed attempt. The same for every attempt.
    #[must_use]
    pub fn delay(&self, rate_limited: bool) -> Duration {
        if rate_limited {
            Duration::from_millis(self.rate_limit_delay_ms)
        } else {
            Duration::from_millis(self.base_delay_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 2000);
        assert_eq!(config.rate_limit_delay_ms, 10_000);
    }

    #[test]
    fn test_delay_does_not_grow_between_attempts() {
        let config = RetryConfig::new().with_base_delay_ms(750);
        let first = config.delay(false);
        let second = config.delay(false);
        assert_eq!(first, Duration::from_millis(750));
        assert_eq!(first, second);
    }

    #[test]
    fn test_rate_limited_delay_is_fixed() {
        let config = RetryConfig::default();
        assert_eq!(config.delay(true), Duration::from_millis(10_000));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.rate_limit_delay_ms, 10_000);
        assert_eq!(RetryConfig::immediate(0).attempts(), 1);
    }

    #[test]
    fn test_growth_settings_are_rejected() {
        let result = serde_json::from_str::<RetryConfig>(r#"{"base_delay_ms": 100, "backoff": "exponential"}"#);
        assert!(result.is_err());
        let result = serde_json::from_str::<RetryConfig>(r#"{"jitter": "full"}"#);
        assert!(result.is_err());
    }
}
