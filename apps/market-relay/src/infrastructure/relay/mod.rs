//! Relay WebSocket Server
//!
//! Downstream surface of the relay. `GET /ws` and `GET /` upgrade to the
//! JSON control protocol; every accepted socket gets one task that owns it
//! and selects over inbound frames, its outbound queue, and the transport
//! heartbeat. When the task ends the client is released from the registry.
//!
//! The outbound queue holds `client_queue_capacity` frames. A client that
//! falls that far behind is evicted by the service, which drops the queue's
//! sender; the task then flushes what is buffered and closes the socket.
//!
//! Upstream events reach clients through [`run_event_pump`], one per feed.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::protocol::{ProtocolError, ServerMessage};
use crate::application::services::RelayService;
use crate::domain::subscription::Feed;
use crate::infrastructure::config::DownstreamSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::upstream::{
    ConnectionState, Heartbeat, HeartbeatAction, HeartbeatConfig, UpstreamEvent,
};

// =============================================================================
// Server State
// =============================================================================

/// Shared state for relay socket tasks.
#[derive(Debug)]
pub struct RelayServerState {
    service: Arc<RelayService>,
    settings: DownstreamSettings,
    cancel: CancellationToken,
}

impl RelayServerState {
    /// Create server state. Open sockets are closed when `cancel` fires.
    #[must_use]
    pub const fn new(
        service: Arc<RelayService>,
        settings: DownstreamSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            settings,
            cancel,
        }
    }

    /// The relay service behind the sockets.
    #[must_use]
    pub const fn service(&self) -> &Arc<RelayService> {
        &self.service
    }
}

/// Router serving the relay protocol on `/ws` and `/`.
pub fn router(state: Arc<RelayServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/", get(ws_handler))
        .with_state(state)
}

// =============================================================================
// Relay Server
// =============================================================================

/// Serve the relay on an already bound listener until cancelled.
///
/// # Errors
///
/// Returns `RelayServerError::ServerFailed` on a fatal I/O error.
pub async fn serve(
    listener: TcpListener,
    state: Arc<RelayServerState>,
) -> Result<(), RelayServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Relay server listening");
    }

    let cancel = state.cancel.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;

    tracing::info!("Relay server stopped");
    Ok(())
}

// =============================================================================
// Socket Handling
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayServerState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.settings.client_queue_capacity);

    let service = &state.service;
    let client_id = service.register_client(tx);
    metrics::set_clients(service.client_count());

    let mut heartbeat = Heartbeat::new(HeartbeatConfig::new(
        state.settings.ping_interval,
        state.settings.pong_timeout,
    ));

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    heartbeat.record_activity();
                    match service.handle_frame(&client_id, text.as_str()) {
                        Ok(()) => record_active_keys(service),
                        Err(e) => metrics::record_client_frame_rejected(e.label()),
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    heartbeat.record_activity();
                    let error = ProtocolError::BinaryFrame;
                    metrics::record_client_frame_rejected(error.label());
                    service.reject(&client_id, &error);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => heartbeat.record_activity(),
                Some(Err(e)) => {
                    tracing::debug!(client_id = %client_id, error = %e, "Client socket error");
                    break;
                }
            },
            outbound = rx.recv() => match outbound {
                Some(msg) => match msg.to_json() {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(client_id = %client_id, kind = msg.kind(), error = %e, "Failed to encode frame");
                    }
                },
                // Evicted.
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            action = heartbeat.tick() => match action {
                HeartbeatAction::SendPing => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                HeartbeatAction::Expired => {
                    tracing::info!(client_id = %client_id, "Client missed heartbeat, closing");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    service.disconnect_client(&client_id);
    metrics::set_clients(service.client_count());
    record_active_keys(service);
}

fn record_active_keys(service: &RelayService) {
    for feed in Feed::all() {
        metrics::set_active_keys(*feed, service.registry().stats(*feed).key_count);
    }
}

// =============================================================================
// Upstream Event Pump
// =============================================================================

/// Forward one connector's events into the relay until the channel closes.
pub async fn run_event_pump(
    feed: Feed,
    mut events: mpsc::Receiver<UpstreamEvent>,
    service: Arc<RelayService>,
) {
    while let Some(event) = events.recv().await {
        match event {
            UpstreamEvent::Tick(tick) => {
                let started = Instant::now();
                let delivery = service.publish_tick(tick);
                metrics::record_fanout_duration(feed, started.elapsed());
                metrics::record_delivery(feed, delivery.delivered, delivery.skipped);
                if delivery.evicted > 0 {
                    metrics::record_evictions(delivery.evicted);
                    metrics::set_clients(service.client_count());
                }
            }
            UpstreamEvent::StateChanged(ConnectionState::Authenticated) => {
                tracing::info!(feed = %feed, "Upstream feed ready");
            }
            UpstreamEvent::StateChanged(state) => {
                tracing::debug!(feed = %feed, state = %state, "Upstream state changed");
            }
            UpstreamEvent::Reconnecting { attempt, delay } => {
                tracing::info!(
                    feed = %feed,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Upstream feed reconnecting"
                );
            }
            UpstreamEvent::AuthFailed(message) => {
                tracing::error!(feed = %feed, message = %message, "Upstream rejected API key");
            }
            UpstreamEvent::GaveUp { attempts } => {
                tracing::error!(feed = %feed, attempts, "Upstream feed gave up reconnecting");
            }
        }
    }

    tracing::debug!(feed = %feed, "Upstream event pump finished");
}

// =============================================================================
// Errors
// =============================================================================

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockUpstreamControl;
    use crate::application::services::RelayLimits;
    use crate::domain::streaming::RawTick;
    use crate::domain::subscription::SubscriptionRegistry;

    fn service() -> Arc<RelayService> {
        let quiet = || {
            let mut mock = MockUpstreamControl::new();
            mock.expect_subscribe().return_const(());
            mock.expect_unsubscribe().return_const(());
            Arc::new(mock)
        };
        Arc::new(RelayService::new(
            Arc::new(SubscriptionRegistry::new()),
            quiet(),
            quiet(),
            RelayLimits::default(),
        ))
    }

    #[tokio::test]
    async fn event_pump_delivers_ticks_until_channel_closes() {
        let service = service();
        let (client_tx, mut client_rx) = mpsc::channel(8);
        let client_id = service.register_client(client_tx);
        service
            .handle_frame(&client_id, r#"{"type":"subscribe","symbols":["AAPL"]}"#)
            .unwrap();
        let _ = client_rx.recv().await;
        let _ = client_rx.recv().await;

        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(run_event_pump(Feed::Equities, rx, Arc::clone(&service)));

        tx.send(UpstreamEvent::StateChanged(ConnectionState::Authenticated))
            .await
            .unwrap();
        tx.send(UpstreamEvent::Tick(RawTick {
            feed: Feed::Equities,
            key: "AAPL".to_string(),
            price: 190.0,
            open: 189.0,
            high: 191.0,
            low: 188.0,
            volume: 1_000.0,
            timestamp_ms: 1_700_000_000_000,
        }))
        .await
        .unwrap();
        drop(tx);

        pump.await.unwrap();
        assert!(matches!(
            client_rx.recv().await,
            Some(ServerMessage::Quote { ref data, .. }) if data.symbol == "AAPL"
        ));
    }

    #[test]
    fn error_messages() {
        let e = RelayServerError::BindFailed("0.0.0.0:1".to_string(), "denied".to_string());
        assert_eq!(e.to_string(), "failed to bind to 0.0.0.0:1: denied");
    }
}
