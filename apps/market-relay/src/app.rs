//! Relay Application
//!
//! [`RelayApp`] wires the relay together from a [`RelayConfig`]: one shared
//! subscription registry, a connector per vendor feed, the relay service,
//! an event pump per feed, and the relay and health servers.
//!
//! Binding is split from running so callers can bind ephemeral ports and
//! read the addresses back before anything connects upstream.
//!
//! ```text
//! RelayApp::bind ──► relay + health listeners
//!        │
//! RelayApp::run ───► event pumps, connectors, health server
//!        │           relay server (until the shutdown token fires)
//!        ▼
//!   connectors stopped, health server drained
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ActiveKeySource, UpstreamControl};
use crate::application::services::RelayService;
use crate::domain::subscription::{Feed, SubscriptionRegistry};
use crate::infrastructure::config::{DownstreamSettings, RelayConfig};
use crate::infrastructure::health::{self, FeedStatusSource, HealthServerError, HealthServerState};
use crate::infrastructure::relay::{self, RelayServerError, RelayServerState, run_event_pump};
use crate::infrastructure::upstream::{
    HeartbeatConfig, ReconnectConfig, UpstreamConfig, UpstreamConnector, UpstreamEvent,
};

/// Capacity of each connector's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// How long the health server gets to drain after the relay stops.
const HEALTH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Errors
// =============================================================================

/// Errors that stop the relay application.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Relay server failure.
    #[error(transparent)]
    Relay(#[from] RelayServerError),

    /// Health server failure.
    #[error(transparent)]
    Health(#[from] HealthServerError),
}

// =============================================================================
// Relay Application
// =============================================================================

/// A fully wired relay with its listeners bound.
pub struct RelayApp {
    service: Arc<RelayService>,
    equities: Arc<UpstreamConnector>,
    options: Arc<UpstreamConnector>,
    equities_rx: mpsc::Receiver<UpstreamEvent>,
    options_rx: mpsc::Receiver<UpstreamEvent>,
    downstream: DownstreamSettings,
    relay_listener: TcpListener,
    health_listener: TcpListener,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RelayApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayApp")
            .field("service", &self.service)
            .field("relay_addr", &self.relay_listener.local_addr().ok())
            .field("health_addr", &self.health_listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl RelayApp {
    /// Build every component and bind both listeners.
    ///
    /// Nothing connects upstream until [`run`](Self::run). Cancelling
    /// `shutdown` stops the servers and both connectors.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if either listener cannot be bound.
    pub async fn bind(config: &RelayConfig, shutdown: CancellationToken) -> Result<Self, AppError> {
        let relay_addr = config.relay_addr();
        let relay_listener = TcpListener::bind(&relay_addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(relay_addr.clone(), e.to_string()))?;

        let health_addr = config.health_addr();
        let health_listener = TcpListener::bind(&health_addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(health_addr.clone(), e.to_string()))?;

        let registry = Arc::new(SubscriptionRegistry::new());
        let key_source = Arc::clone(&registry) as Arc<dyn ActiveKeySource>;

        let (equities, equities_rx) = build_connector(
            Feed::Equities,
            &config.upstream.stocks_url,
            config,
            Arc::clone(&key_source),
            &shutdown,
        );
        let (options, options_rx) = build_connector(
            Feed::Options,
            &config.upstream.options_url,
            config,
            key_source,
            &shutdown,
        );

        let service = Arc::new(RelayService::new(
            registry,
            Arc::clone(&equities) as Arc<dyn UpstreamControl>,
            Arc::clone(&options) as Arc<dyn UpstreamControl>,
            config.downstream.limits,
        ));

        Ok(Self {
            service,
            equities,
            options,
            equities_rx,
            options_rx,
            downstream: config.downstream.clone(),
            relay_listener,
            health_listener,
            shutdown,
        })
    }

    /// The relay service.
    #[must_use]
    pub const fn service(&self) -> &Arc<RelayService> {
        &self.service
    }

    /// The connector for `feed`.
    #[must_use]
    pub const fn connector(&self, feed: Feed) -> &Arc<UpstreamConnector> {
        match feed {
            Feed::Equities => &self.equities,
            Feed::Options => &self.options,
        }
    }

    /// Bound relay WebSocket address.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn relay_addr(&self) -> std::io::Result<SocketAddr> {
        self.relay_listener.local_addr()
    }

    /// Bound health server address.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn health_addr(&self) -> std::io::Result<SocketAddr> {
        self.health_listener.local_addr()
    }

    /// Connect upstream and serve until the shutdown token fires.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the relay or health server fails.
    pub async fn run(self) -> Result<(), AppError> {
        let Self {
            service,
            equities,
            options,
            equities_rx,
            options_rx,
            downstream,
            relay_listener,
            health_listener,
            shutdown,
        } = self;

        tokio::spawn(run_event_pump(
            Feed::Equities,
            equities_rx,
            Arc::clone(&service),
        ));
        tokio::spawn(run_event_pump(
            Feed::Options,
            options_rx,
            Arc::clone(&service),
        ));

        equities.connect();
        options.connect();

        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&service),
            Arc::clone(&equities) as Arc<dyn FeedStatusSource>,
            Arc::clone(&options) as Arc<dyn FeedStatusSource>,
        ));
        let health = tokio::spawn(health::serve(
            health_listener,
            health_state,
            shutdown.clone(),
        ));

        let relay_state = Arc::new(RelayServerState::new(
            Arc::clone(&service),
            downstream,
            shutdown.clone(),
        ));
        tracing::info!("Market relay ready");
        let relayed = relay::serve(relay_listener, relay_state).await;

        // A failed relay server takes everything else down with it.
        shutdown.cancel();
        equities.stop();
        options.stop();

        match tokio::time::timeout(HEALTH_DRAIN_TIMEOUT, health).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => tracing::error!(error = %e, "Health server task failed"),
            Err(_) => tracing::warn!(
                timeout_secs = HEALTH_DRAIN_TIMEOUT.as_secs(),
                "Health server did not stop in time"
            ),
        }

        relayed?;
        Ok(())
    }
}

/// Build one connector and its event channel.
fn build_connector(
    feed: Feed,
    url: &str,
    config: &RelayConfig,
    keys: Arc<dyn ActiveKeySource>,
    shutdown: &CancellationToken,
) -> (Arc<UpstreamConnector>, mpsc::Receiver<UpstreamEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let mut upstream = UpstreamConfig::new(feed, url, config.api_key.clone());
    upstream.reconnect = ReconnectConfig::from_websocket_settings(&config.websocket);
    upstream.heartbeat = HeartbeatConfig::from_websocket_settings(&config.websocket);

    let connector = Arc::new(UpstreamConnector::new(
        upstream,
        keys,
        tx,
        shutdown.child_token(),
    ));
    (connector, rx)
}
