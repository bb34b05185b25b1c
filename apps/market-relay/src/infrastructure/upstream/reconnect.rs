//! Reconnection Policy
//!
//! Linear backoff for WebSocket reconnection: the n-th consecutive attempt
//! waits `base_delay x n`, optionally capped, with an optional attempt limit.
//! Shared by the upstream connectors and the relay client manager.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay unit; attempt `n` waits `base_delay x n`.
    pub base_delay: Duration,
    /// Upper bound on a single delay (`None` = uncapped).
    pub max_delay: Option<Duration>,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: None,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        base_delay: Duration,
        max_delay: Option<Duration>,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor,
            max_attempts,
        }
    }

    /// Policy used by the relay client manager: 2 s steps, capped at 10 s,
    /// at most 10 attempts.
    #[must_use]
    pub const fn client_default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Some(Duration::from_secs(10)),
            jitter_factor: 0.0,
            max_attempts: 10,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            base_delay: settings.reconnect_delay,
            max_delay: None,
            jitter_factor: 0.0,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Reconnection policy implementing capped linear backoff.
///
/// # Example
///
/// ```rust
/// use market_relay::infrastructure::upstream::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the delay before the next attempt.
    ///
    /// Returns `None` once the attempt limit has been reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;

        let linear = self.config.base_delay.saturating_mul(self.attempt_count);
        let capped = self.config.max_delay.map_or(linear, |max| linear.min(max));

        Some(self.apply_jitter(capped))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Number of attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// The configured attempt limit (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, None);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn policy_linear_backoff() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::new(
            Duration::from_millis(100),
            None,
            0.0,
            0,
        ));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(300)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
    }

    #[test_case(1, 2 ; "first attempt")]
    #[test_case(4, 8 ; "fourth attempt")]
    #[test_case(5, 10 ; "reaches cap")]
    #[test_case(9, 10 ; "stays capped")]
    fn client_policy_delays(attempt: u32, expected_secs: u64) {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::client_default());

        let mut delay = None;
        for _ in 0..attempt {
            delay = policy.next_delay();
        }

        assert_eq!(delay, Some(Duration::from_secs(expected_secs)));
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::new(
            Duration::from_millis(100),
            None,
            0.0,
            3,
        ));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::new(
            Duration::from_millis(100),
            None,
            0.0,
            3,
        ));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig::new(
                Duration::from_millis(1000),
                None,
                0.1,
                0,
            ));

            let millis = policy.next_delay().unwrap().as_millis();

            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        });

        for _ in 0..1000 {
            assert!(policy.should_retry());
            assert!(policy.next_delay().is_some());
        }
    }
}
