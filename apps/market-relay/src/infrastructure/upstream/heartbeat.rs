//! Heartbeat
//!
//! Transport-level liveness for a WebSocket owned by a single task. The
//! owning task selects on [`Heartbeat::tick`] alongside its socket and
//! reports every inbound frame through [`Heartbeat::record_activity`].
//!
//! A ping is sent every `ping_interval`. If nothing at all arrives within
//! `pong_timeout` of the oldest unanswered ping, the connection is dead.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence tolerated after an unanswered ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the owning task should do after a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a transport ping.
    SendPing,
    /// The peer has been silent too long; close the connection.
    Expired,
}

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    interval: Interval,
    unanswered_since: Option<Instant>,
}

impl Heartbeat {
    /// Start a heartbeat whose first tick fires one interval from now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let mut interval =
            tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            config,
            interval,
            unanswered_since: None,
        }
    }

    /// Wait for the next tick and decide what to do.
    ///
    /// Cancel-safe; intended for use inside `tokio::select!`.
    pub async fn tick(&mut self) -> HeartbeatAction {
        let now = self.interval.tick().await;
        self.check(now)
    }

    /// Decide what to do at `now`.
    pub fn check(&mut self, now: Instant) -> HeartbeatAction {
        match self.unanswered_since {
            Some(since) if now.saturating_duration_since(since) >= self.config.pong_timeout => {
                HeartbeatAction::Expired
            }
            Some(_) => HeartbeatAction::SendPing,
            None => {
                self.unanswered_since = Some(now);
                HeartbeatAction::SendPing
            }
        }
    }

    /// Record that the peer sent something (pong or data).
    pub const fn record_activity(&mut self) {
        self.unanswered_since = None;
    }

    /// Whether a ping is currently unanswered.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.unanswered_since.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(interval_ms: u64, timeout_ms: u64) -> Heartbeat {
        Heartbeat::new(HeartbeatConfig::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        ))
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn first_check_sends_ping() {
        let mut hb = heartbeat(30_000, 60_000);

        assert_eq!(hb.check(Instant::now()), HeartbeatAction::SendPing);
        assert!(hb.is_waiting());
    }

    #[tokio::test]
    async fn keeps_pinging_until_timeout_then_expires() {
        let mut hb = heartbeat(30_000, 60_000);
        let t0 = Instant::now();

        assert_eq!(hb.check(t0), HeartbeatAction::SendPing);
        assert_eq!(hb.check(t0 + Duration::from_secs(30)), HeartbeatAction::SendPing);
        assert_eq!(hb.check(t0 + Duration::from_secs(60)), HeartbeatAction::Expired);
    }

    #[tokio::test]
    async fn activity_clears_outstanding_ping() {
        let mut hb = heartbeat(30_000, 60_000);
        let t0 = Instant::now();

        hb.check(t0);
        hb.record_activity();
        assert!(!hb.is_waiting());

        // A fresh window starts at the next ping
        assert_eq!(hb.check(t0 + Duration::from_secs(90)), HeartbeatAction::SendPing);
        assert_eq!(hb.check(t0 + Duration::from_secs(120)), HeartbeatAction::SendPing);
        assert_eq!(hb.check(t0 + Duration::from_secs(150)), HeartbeatAction::Expired);
    }

    #[tokio::test]
    async fn tick_fires_after_interval() {
        let mut hb = heartbeat(20, 1_000);
        let start = Instant::now();

        let action = hb.tick().await;

        assert_eq!(action, HeartbeatAction::SendPing);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
