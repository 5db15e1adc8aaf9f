//! Resilience utilities: retry policy with exponential backoff.
//!
//! Remote sync services are polled over HTTP and may be briefly
//! unreachable (rolling deploys, DNS propagation, pod restarts). The
//! cross-service poller retries reads with [`RetryConfig`] before
//! skipping a remote for the current round.
//!
//! # Example
//!
//! ```rust
//! use manifest_sync::resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let retry = RetryConfig::default();
//! assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
//! assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
//! ```

use std::time::Duration;

/// Configuration for retry behavior on remote reads.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up.
    /// Set to `u32::MAX` for effectively infinite retries (daemon mode).
    pub max_attempts: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual HTTP request.
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial startup.
    ///
    /// Use this while bringing the controller up so configuration
    /// errors (wrong host, bad port) surface quickly.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay     Cumulative
    /// -------  -----     ----------
    /// 1        500ms     500ms
    /// 2        750ms     1.25s
    /// 3        1.12s     2.37s
    /// ...
    /// 10       ~19s      ~40s (total)
    /// ```
    pub fn startup() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 1.5,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Patient retry for a long-running daemon.
    ///
    /// Retries with exponential backoff capped at 5 minutes. Remote
    /// outages can last hours; the poller keeps trying so it recovers
    /// without a manual restart.
    pub fn daemon() -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Fast-fail retry for tests.
    ///
    /// Fails quickly to avoid slow tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            request_timeout: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        // Clamp in f64 space; large attempts overflow Duration otherwise.
        let delay_secs = (self.initial_delay.as_secs_f64() * multiplier)
            .min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_config() {
        let config = RetryConfig::daemon();
        assert_eq!(config.max_attempts, u32::MAX);
        assert_eq!(config.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_startup_config() {
        let config = RetryConfig::startup();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            request_timeout: Duration::from_secs(5),
        };

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(16));
        // Should cap at max_delay
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_config_testing_preset() {
        let config = RetryConfig::testing();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(10));
        assert_eq!(config.max_delay, Duration::from_millis(100));
        assert_eq!(config.request_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert_eq!(config.backoff_factor, 2.0);
    }

    #[test]
    fn test_delay_for_attempt_zero() {
        let config = RetryConfig::default();
        // Attempt 0 should return initial_delay
        assert_eq!(config.delay_for_attempt(0), config.initial_delay);
    }

    #[test]
    fn test_delay_for_attempt_caps_at_max() {
        let config = RetryConfig {
            max_attempts: 100,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            request_timeout: Duration::from_secs(5),
        };
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_config_clone() {
        let config = RetryConfig::daemon();
        let cloned = config.clone();
        assert_eq!(cloned.max_attempts, config.max_attempts);
        assert_eq!(cloned.max_delay, config.max_delay);
    }
}
