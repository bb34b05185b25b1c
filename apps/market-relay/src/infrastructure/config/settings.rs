//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! Unparseable optional values fall back to their defaults.

use std::time::Duration;

use crate::application::services::RelayLimits;
use crate::infrastructure::upstream::auth::ApiKey;

/// Default vendor stocks cluster.
pub const DEFAULT_STOCKS_URL: &str = "wss://socket.massive.com/stocks";

/// Default vendor options cluster.
pub const DEFAULT_OPTIONS_URL: &str = "wss://socket.massive.com/options";

/// Upstream vendor endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// Equities WebSocket URL.
    pub stocks_url: String,
    /// Options WebSocket URL.
    pub options_url: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            stocks_url: DEFAULT_STOCKS_URL.to_string(),
            options_url: DEFAULT_OPTIONS_URL.to_string(),
        }
    }
}

/// Upstream WebSocket connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Reconnect delay unit; attempt `n` waits `n` times this.
    pub reconnect_delay: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_millis(5000),
            max_reconnect_attempts: 5,
        }
    }
}

/// Downstream client connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamSettings {
    /// Transport ping interval for relay clients.
    pub ping_interval: Duration,
    /// Silence tolerated after an unanswered ping.
    pub pong_timeout: Duration,
    /// Frames buffered per client before it is disconnected as too slow.
    pub client_queue_capacity: usize,
    /// Relay limits on subscription batch size.
    pub limits: RelayLimits,
}

impl Default for DownstreamSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            client_queue_capacity: 1024,
            limits: RelayLimits::default(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Relay WebSocket port.
    pub relay_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            relay_port: 3001,
            health_port: 8082,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Vendor API key.
    pub api_key: ApiKey,
    /// Server port settings.
    pub server: ServerSettings,
    /// Vendor endpoints.
    pub upstream: UpstreamSettings,
    /// Upstream WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Downstream client settings.
    pub downstream: DownstreamSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `POLYGON_API_KEY` is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_key = lookup("POLYGON_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("POLYGON_API_KEY".to_string()))?;
        let api_key = ApiKey::new(raw_key)
            .map_err(|_| ConfigError::EmptyValue("POLYGON_API_KEY".to_string()))?;

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            host: lookup("RELAY_HOST")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(server_defaults.host),
            relay_port: parse_or(&lookup, "WS_PORT", server_defaults.relay_port),
            health_port: parse_or(&lookup, "RELAY_HEALTH_PORT", server_defaults.health_port),
        };

        let upstream_defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            stocks_url: lookup("POLYGON_STOCKS_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(upstream_defaults.stocks_url),
            options_url: lookup("POLYGON_OPTIONS_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(upstream_defaults.options_url),
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: secs_or(
                &lookup,
                "RELAY_HEARTBEAT_INTERVAL_SECS",
                ws_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: secs_or(
                &lookup,
                "RELAY_HEARTBEAT_TIMEOUT_SECS",
                ws_defaults.heartbeat_timeout,
            ),
            reconnect_delay: millis_or(
                &lookup,
                "RELAY_RECONNECT_DELAY_MS",
                ws_defaults.reconnect_delay,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                ws_defaults.max_reconnect_attempts,
            ),
        };

        let down_defaults = DownstreamSettings::default();
        let downstream = DownstreamSettings {
            ping_interval: secs_or(
                &lookup,
                "RELAY_CLIENT_PING_INTERVAL_SECS",
                down_defaults.ping_interval,
            ),
            pong_timeout: secs_or(
                &lookup,
                "RELAY_CLIENT_PONG_TIMEOUT_SECS",
                down_defaults.pong_timeout,
            ),
            client_queue_capacity: parse_or(
                &lookup,
                "RELAY_CLIENT_QUEUE_CAPACITY",
                down_defaults.client_queue_capacity,
            )
            .max(1),
            limits: RelayLimits {
                max_symbols_per_subscribe: parse_or(
                    &lookup,
                    "RELAY_MAX_SYMBOLS_PER_SUBSCRIBE",
                    down_defaults.limits.max_symbols_per_subscribe,
                ),
                max_contracts_per_subscribe: parse_or(
                    &lookup,
                    "RELAY_MAX_CONTRACTS_PER_SUBSCRIBE",
                    down_defaults.limits.max_contracts_per_subscribe,
                ),
            },
        };

        Ok(Self {
            api_key,
            server,
            upstream,
            websocket,
            downstream,
        })
    }

    /// Relay WebSocket bind address.
    #[must_use]
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.relay_port)
    }

    /// Health server bind address.
    #[must_use]
    pub fn health_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.health_port)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
