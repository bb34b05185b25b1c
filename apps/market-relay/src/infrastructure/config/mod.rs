//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_OPTIONS_URL, DEFAULT_STOCKS_URL, DownstreamSettings, RelayConfig,
    ServerSettings, UpstreamSettings, WebSocketSettings,
};
