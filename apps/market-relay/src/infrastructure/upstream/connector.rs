//! Upstream Connector
//!
//! Maintains one long-lived WebSocket to a vendor feed (equities or
//! options), authenticates, replays the active subscription set on every
//! open, decodes market events into ticks, and reconnects with linear
//! backoff when the transport drops.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Authenticated
//!       ^              |             |              |
//!       +--------------+-------------+--------------+   (close / error)
//!
//! AuthFailed : vendor rejected the key (retried under the attempt cap)
//! GaveUp     : attempt cap reached, no further retries
//! Stopped    : stop() called
//! ```
//!
//! The attempt counter resets when the vendor reports `auth_success`, not
//! when the transport opens, so a rejected key exhausts the cap.
//!
//! One task owns the socket. Subscribe/unsubscribe calls from other tasks
//! are queued to it through an unbounded channel and are only accepted while
//! the transport is open; anything still queued when a new connection opens
//! is discarded, since the replay snapshot supersedes it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::auth::{ApiKey, AuthError, AuthHandler, AuthProgress};
use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::messages::{ControlRequest, VendorMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{ActiveKeySource, UpstreamControl};
use crate::domain::streaming::RawTick;
use crate::domain::subscription::{Feed, SubscriptionKey};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Control request could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No pong or data within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Connection closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// State and Events
// =============================================================================

/// Connection state of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected; a reconnect may be pending.
    #[default]
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open, auth sent.
    Connected,
    /// Vendor accepted the key.
    Authenticated,
    /// Vendor rejected the key.
    AuthFailed,
    /// Attempt cap reached; no further retries.
    GaveUp,
    /// `stop()` was called.
    Stopped,
}

impl ConnectionState {
    /// Whether the transport is open and control frames can be sent.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    /// Label for logs and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::AuthFailed => "auth_failed",
            Self::GaveUp => "gave_up",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by a connector.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A market event was decoded.
    Tick(RawTick),
    /// A reconnect has been scheduled.
    Reconnecting {
        /// Attempt number since the vendor last accepted the key.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The vendor rejected the API key.
    AuthFailed(String),
    /// The attempt cap was reached.
    GaveUp {
        /// Attempts made.
        attempts: u32,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one upstream connector.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Feed partition this connector serves.
    pub feed: Feed,
    /// WebSocket URL.
    pub url: String,
    /// Vendor API key.
    pub api_key: ApiKey,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl UpstreamConfig {
    /// Create a new configuration with default reconnect and heartbeat.
    #[must_use]
    pub fn new(feed: Feed, url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            feed,
            url: url.into(),
            api_key,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time connector statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamStats {
    /// Feed partition.
    pub feed: Feed,
    /// Current state.
    pub state: ConnectionState,
    /// Text frames received over the connector's lifetime.
    pub frames_received: u64,
    /// Ticks emitted over the connector's lifetime.
    pub ticks_emitted: u64,
    /// Reconnect attempts over the connector's lifetime.
    pub reconnect_attempts: u64,
    /// Last successful transport open.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last connection error.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    ticks_emitted: AtomicU64,
    reconnect_attempts: AtomicU64,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

// =============================================================================
// Upstream Connector
// =============================================================================

/// WebSocket connector for one vendor feed.
pub struct UpstreamConnector {
    config: UpstreamConfig,
    codec: JsonCodec,
    keys: Arc<dyn ActiveKeySource>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    command_tx: mpsc::UnboundedSender<ControlRequest>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlRequest>>>,
    state: RwLock<ConnectionState>,
    counters: Counters,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("feed", &self.config.feed)
            .field("url", &self.config.url)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl UpstreamConnector {
    /// Create a connector. Nothing happens until [`connect`](Self::connect).
    ///
    /// `keys` supplies the snapshot replayed after every open; `cancel` ends
    /// the connector when cancelled (directly or through [`stop`](Self::stop)).
    #[must_use]
    pub fn new(
        config: UpstreamConfig,
        keys: Arc<dyn ActiveKeySource>,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            config,
            codec: JsonCodec::new(),
            keys,
            event_tx,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            state: RwLock::new(ConnectionState::Disconnected),
            counters: Counters::default(),
            started: AtomicBool::new(false),
            cancel,
        }
    }

    /// Feed partition this connector serves.
    #[must_use]
    pub const fn feed(&self) -> Feed {
        self.config.feed
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the transport is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Spawn the connection state machine.
    ///
    /// Returns `false` without doing anything if it was already started.
    pub fn connect(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!(feed = %self.config.feed, "Connector already running");
            return false;
        }

        let Some(commands) = self.command_rx.lock().take() else {
            return false;
        };

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(commands).await });
        true
    }

    /// Stop the connector. It ends in [`ConnectionState::Stopped`].
    pub fn stop(&self) {
        tracing::info!(feed = %self.config.feed, "Stopping upstream connector");
        self.cancel.cancel();
    }

    /// Snapshot statistics.
    #[must_use]
    pub fn stats(&self) -> UpstreamStats {
        UpstreamStats {
            feed: self.config.feed,
            state: self.state(),
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            ticks_emitted: self.counters.ticks_emitted.load(Ordering::Relaxed),
            reconnect_attempts: self.counters.reconnect_attempts.load(Ordering::Relaxed),
            last_connected_at: *self.counters.last_connected_at.read(),
            last_error: self.counters.last_error.read().clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Connection loop
    // -------------------------------------------------------------------------

    async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<ControlRequest>) {
        let feed = self.config.feed;
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting).await;

            match self.connect_and_run(&mut commands, &mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(feed = %feed, error = %e, "Upstream connection lost");
                    metrics::record_upstream_error(feed, error_label(&e));
                    *self.counters.last_error.write() = Some(e.to_string());
                    if self.state() != ConnectionState::AuthFailed {
                        self.set_state(ConnectionState::Disconnected).await;
                    }
                }
            }

            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(
                    feed = %feed,
                    attempts,
                    "Max reconnection attempts reached, giving up"
                );
                self.set_state(ConnectionState::GaveUp).await;
                self.emit(UpstreamEvent::GaveUp { attempts }).await;
                return;
            };

            let attempt = policy.attempt_count();
            self.counters.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            metrics::record_reconnect(feed);
            tracing::info!(
                feed = %feed,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to upstream feed"
            );
            self.emit(UpstreamEvent::Reconnecting { attempt, delay }).await;

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Stopped).await;
        tracing::info!(feed = %feed, "Upstream connector stopped");
    }

    /// Connect, authenticate, replay, and pump frames until error or cancel.
    async fn connect_and_run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<ControlRequest>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), UpstreamError> {
        let feed = self.config.feed;
        tracing::info!(feed = %feed, url = %self.config.url, "Connecting to upstream feed");

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result?,
        };
        let (ws_stream, _response) = connected;
        let (mut write, mut read) = ws_stream.split();

        *self.counters.last_connected_at.write() = Some(Utc::now());

        let mut auth = AuthHandler::new(self.config.api_key.clone());
        auth.on_connected();
        self.set_state(ConnectionState::Connected).await;

        // Anything queued before this point targeted a dead transport.
        let mut stale = 0usize;
        while commands.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(feed = %feed, stale, "Discarded stale control requests");
        }

        let auth_request = auth.create_auth_request();
        write
            .send(Message::Text(self.codec.encode(&auth_request)?.into()))
            .await?;

        let active = self.keys.active_keys(feed);
        if !active.is_empty() {
            tracing::info!(feed = %feed, count = active.len(), "Replaying subscriptions");
            let replay = ControlRequest::subscribe(&active);
            write
                .send(Message::Text(self.codec.encode(&replay)?.into()))
                .await?;
        }

        let mut heartbeat = Heartbeat::new(self.config.heartbeat.clone());
        // The attempt counter only resets once the vendor accepts the key.
        let mut authenticated = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                action = heartbeat.tick() => match action {
                    HeartbeatAction::SendPing => {
                        write.send(Message::Ping(Vec::new().into())).await?;
                    }
                    HeartbeatAction::Expired => {
                        tracing::warn!(feed = %feed, "Heartbeat timeout");
                        return Err(UpstreamError::HeartbeatTimeout);
                    }
                },
                Some(request) = commands.recv() => {
                    tracing::debug!(feed = %feed, request = ?request, "Sending control request");
                    write
                        .send(Message::Text(self.codec.encode(&request)?.into()))
                        .await?;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.record_activity();
                        self.handle_text_message(text.as_str(), &mut auth).await;
                        if !authenticated && auth.is_authenticated() {
                            authenticated = true;
                            policy.reset();
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat.record_activity();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(feed = %feed, frame = ?frame, "Server sent close frame");
                        return Err(UpstreamError::ConnectionClosed);
                    }
                    Some(Ok(_)) => heartbeat.record_activity(),
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::info!(feed = %feed, "WebSocket stream ended");
                        return Err(UpstreamError::ConnectionClosed);
                    }
                },
            }
        }
    }

    /// Decode one text frame and act on its events.
    async fn handle_text_message(&self, text: &str, auth: &mut AuthHandler) {
        let feed = self.config.feed;
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_upstream_frame(feed);

        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(feed = %feed, error = %e, "Dropping undecodable upstream frame");
                metrics::record_upstream_error(feed, "decode");
                return;
            }
        };

        for (index, e) in &frame.rejected {
            tracing::debug!(feed = %feed, index, error = %e, "Skipping malformed upstream event");
        }

        let now_ms = Utc::now().timestamp_millis();
        for msg in frame.messages {
            match msg {
                VendorMessage::Status(status) => self.handle_status(&status, auth).await,
                VendorMessage::Unknown(ev) => {
                    tracing::trace!(feed = %feed, ev = %ev, "Ignoring unhandled event type");
                }
                market => {
                    if let Some(tick) = market.into_tick(feed, now_ms) {
                        self.counters.ticks_emitted.fetch_add(1, Ordering::Relaxed);
                        metrics::record_upstream_tick(feed);
                        self.emit(UpstreamEvent::Tick(tick)).await;
                    }
                }
            }
        }
    }

    async fn handle_status(&self, status: &super::messages::StatusMessage, auth: &mut AuthHandler) {
        let feed = self.config.feed;
        match auth.on_status(status) {
            Ok(AuthProgress::Authenticated) => {
                tracing::info!(feed = %feed, "Upstream feed authenticated");
                self.set_state(ConnectionState::Authenticated).await;
            }
            Ok(AuthProgress::Connected | AuthProgress::Informational) => {
                tracing::debug!(
                    feed = %feed,
                    auth_state = ?auth.state(),
                    message = %status.message,
                    "Upstream status"
                );
            }
            Err(AuthError::InvalidCredentials(message)) => {
                tracing::error!(feed = %feed, message = %message, "Upstream authentication failed");
                metrics::record_upstream_error(feed, "auth_failed");
                self.set_state(ConnectionState::AuthFailed).await;
                self.emit(UpstreamEvent::AuthFailed(message)).await;
            }
            Err(e) => {
                tracing::warn!(feed = %feed, error = %e, "Upstream reported an error");
                metrics::record_upstream_error(feed, "vendor");
            }
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous == state {
            return;
        }

        tracing::debug!(feed = %self.config.feed, from = %previous, to = %state, "Upstream state changed");
        metrics::set_upstream_connected(self.config.feed, state.is_open());
        self.emit(UpstreamEvent::StateChanged(state)).await;
    }

    async fn emit(&self, event: UpstreamEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::trace!(feed = %self.config.feed, "Upstream event receiver dropped");
        }
    }

    fn enqueue(&self, request: ControlRequest, keys: &[SubscriptionKey]) {
        let feed = self.config.feed;
        if keys.is_empty() {
            return;
        }
        if !self.is_connected() {
            tracing::debug!(
                feed = %feed,
                count = keys.len(),
                "Upstream not open, control request dropped"
            );
            return;
        }
        let _ = self.command_tx.send(request);
    }
}

impl UpstreamControl for UpstreamConnector {
    fn subscribe(&self, keys: &[SubscriptionKey]) {
        self.enqueue(ControlRequest::subscribe(keys), keys);
    }

    fn unsubscribe(&self, keys: &[SubscriptionKey]) {
        self.enqueue(ControlRequest::unsubscribe(keys), keys);
    }
}

const fn error_label(e: &UpstreamError) -> &'static str {
    match e {
        UpstreamError::WebSocket(_) => "websocket",
        UpstreamError::Codec(_) => "codec",
        UpstreamError::HeartbeatTimeout => "heartbeat_timeout",
        UpstreamError::ConnectionClosed => "closed",
    }
}
