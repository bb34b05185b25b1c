#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Relay - Market Data Fan-out
//!
//! A WebSocket relay that maintains one connection per vendor feed
//! (equities and options) and multiplexes market data to many downstream
//! clients. Upstream subscriptions are reference counted: a key is
//! subscribed when its first client asks for it and released when the last
//! one goes away.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `subscription`: Reference-counted registry, partitioned by feed
//!   - `streaming`: Ticks and the last-price cache
//!
//! - **Application**: Use cases and port definitions
//!   - `protocol`: Downstream JSON messages
//!   - `ports`: Upstream control and active-key snapshot
//!   - `services`: Relay service (control frames, tick fan-out)
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Vendor WebSocket connectors
//!   - `relay`: Downstream WebSocket server
//!   - `client`: Client-side connection manager
//!   - `broadcast`: Client-side update channels
//!   - `config`: Environment configuration
//!   - `health`: Health, stats and metrics endpoint
//!
//! - **App**: Wiring of all of the above into one runnable relay
//!
//! # Data Flow
//!
//! ```text
//! Vendor stocks WS  --+                                +--> Client 1
//!                     |   +-------------+   +-------+  |
//!                     +-->|    Relay    |-->| Relay |--+--> Client 2
//!                     |   |   Service   |   |  WS   |  |
//! Vendor options WS --+   +-------------+   +-------+  +--> Client N
//!        ^                       |
//!        +--- subscribe / unsubscribe (first / last interest)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Application wiring - builds and runs the whole relay.
pub mod app;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{LastPriceCache, RawTick, Tick};
pub use domain::subscription::{
    ClientId, Feed, Interest, Release, ReleasedKey, SubscriptionKey, SubscriptionRegistry,
    SubscriptionStats, TotalSubscriptionStats,
};

// Application
pub use application::ports::{ActiveKeySource, UpstreamControl};
pub use application::protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use application::services::{Delivery, RelayLimits, RelayService, RelayStats};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, DownstreamSettings, RelayConfig, ServerSettings, UpstreamSettings,
    WebSocketSettings,
};

// Upstream connectors
pub use infrastructure::upstream::{
    ApiKey, ConnectionState, UpstreamConfig, UpstreamConnector, UpstreamEvent,
};

// Relay server
pub use infrastructure::relay::{RelayServerError, RelayServerState};

// Client manager
pub use infrastructure::client::{ClientError, RelayClient, RelayClientConfig, WidgetId};

// Health server
pub use infrastructure::health::{HealthServerError, HealthServerState};

// Application wiring
pub use app::{AppError, RelayApp};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
