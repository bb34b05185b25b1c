//! Relay Client Connection Manager
//!
//! Client-side counterpart of the relay: one outbound WebSocket shared by
//! many local widgets. Widget interest is reference counted with the same
//! [`SubscriptionRegistry`] the relay uses, so a wire frame only goes out
//! when a key gains its first widget or loses its last one.
//!
//! Every (re)connect replays the held keys as `subscribe` and
//! `subscribe_options` frames no larger than the relay accepts per request,
//! so nothing is truncated on the far side. Incoming updates land in a
//! [`QuoteStore`] and are re-published on an [`UpdateHub`]; connection
//! status is a `watch` channel.
//!
//! Frames are queued while the registry partition that produced them is
//! still locked, so the wire order matches the order of interest changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::protocol::{ClientMessage, OptionUpdateData, QuoteData, ServerMessage};
use crate::application::services::RelayLimits;
use crate::domain::subscription::{Feed, SubscriptionKey, SubscriptionRegistry};
use crate::infrastructure::broadcast::{SharedUpdateHub, UpdateHub, UpdateHubConfig};
use crate::infrastructure::upstream::reconnect::{ReconnectConfig, ReconnectPolicy};

/// Identifier of a local consumer (a dashboard widget).
pub type WidgetId = String;

// =============================================================================
// Errors
// =============================================================================

/// Errors that end one relay connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The relay closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Relay client configuration.
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Relay WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Update hub capacities.
    pub hub: UpdateHubConfig,
    /// Largest subscribe batch the relay accepts per frame.
    pub limits: RelayLimits,
}

impl RelayClientConfig {
    /// Configuration with the client reconnect defaults
    /// (2 s per attempt, capped at 10 s, 10 attempts).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::client_default(),
            hub: UpdateHubConfig::default(),
            limits: RelayLimits::default(),
        }
    }
}

// =============================================================================
// Quote Store
// =============================================================================

/// Last update received per key.
#[derive(Debug, Default)]
pub struct QuoteStore {
    quotes: RwLock<HashMap<SubscriptionKey, QuoteData>>,
    options: RwLock<HashMap<SubscriptionKey, OptionUpdateData>>,
}

impl QuoteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest quote for a ticker.
    #[must_use]
    pub fn quote(&self, symbol: &str) -> Option<QuoteData> {
        self.quotes.read().get(symbol).cloned()
    }

    /// Latest update for an option contract.
    #[must_use]
    pub fn option(&self, contract_id: &str) -> Option<OptionUpdateData> {
        self.options.read().get(contract_id).cloned()
    }

    /// Number of keys with a stored update.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len() + self.options.read().len()
    }

    /// Whether nothing has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put_quote(&self, quote: QuoteData) {
        self.quotes.write().insert(quote.symbol.clone(), quote);
    }

    fn put_option(&self, update: OptionUpdateData) {
        self.options
            .write()
            .insert(update.contract_id.clone(), update);
    }
}

// =============================================================================
// Relay Client
// =============================================================================

/// Connection manager for one relay endpoint.
///
/// # Example
///
/// ```rust
/// use market_relay::infrastructure::client::{RelayClient, RelayClientConfig};
///
/// let client = RelayClient::new(RelayClientConfig::new("ws://localhost:3001/ws"));
/// client.subscribe_to_stock("aapl", "watchlist");
/// client.subscribe_to_stock("AAPL", "chart");
///
/// // Two widgets, one key.
/// assert_eq!(client.held_keys(market_relay::Feed::Equities), vec!["AAPL"]);
/// ```
pub struct RelayClient {
    config: RelayClientConfig,
    registry: SubscriptionRegistry<WidgetId>,
    hub: SharedUpdateHub,
    store: QuoteStore,
    status_tx: watch::Sender<bool>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    client_id: RwLock<Option<String>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("url", &self.config.url)
            .field("connected", &*self.status_tx.borrow())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RelayClient {
    /// Create a client. Nothing connects until [`start`](Self::start).
    #[must_use]
    pub fn new(config: RelayClientConfig) -> Self {
        let hub = Arc::new(UpdateHub::new(config.hub));
        let (status_tx, _) = watch::channel(false);
        Self {
            config,
            registry: SubscriptionRegistry::new(),
            hub,
            store: QuoteStore::new(),
            status_tx,
            outbound: Mutex::new(None),
            client_id: RwLock::new(None),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the connection task.
    ///
    /// Returns `false` if the client was already started.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await });
        true
    }

    /// Close the connection and stop reconnecting.
    pub fn stop(&self) {
        tracing::info!(url = %self.config.url, "Stopping relay client");
        self.cancel.cancel();
    }

    /// Whether the relay connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.status_tx.borrow()
    }

    /// Connection status updates.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<bool> {
        self.status_tx.subscribe()
    }

    /// Client id assigned by the relay on the current connection.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    /// Update hub carrying relay updates.
    #[must_use]
    pub const fn hub(&self) -> &SharedUpdateHub {
        &self.hub
    }

    /// New receiver for equity quotes.
    #[must_use]
    pub fn quotes(&self) -> broadcast::Receiver<QuoteData> {
        self.hub.quotes_rx()
    }

    /// New receiver for option updates.
    #[must_use]
    pub fn option_updates(&self) -> broadcast::Receiver<OptionUpdateData> {
        self.hub.option_updates_rx()
    }

    /// Last update per key.
    #[must_use]
    pub const fn store(&self) -> &QuoteStore {
        &self.store
    }

    /// Keys held by at least one widget.
    #[must_use]
    pub fn held_keys(&self, feed: Feed) -> Vec<SubscriptionKey> {
        self.registry.active_keys(feed)
    }

    /// Register `widget`'s interest in an equity ticker.
    pub fn subscribe_to_stock(&self, symbol: &str, widget: &str) {
        let Some(key) = Feed::Equities.normalize_key(symbol) else {
            return;
        };
        self.registry
            .add_interests_with(Feed::Equities, &widget.to_string(), &[key], |new| {
                self.send(ClientMessage::Subscribe {
                    symbols: new.to_vec(),
                });
            });
    }

    /// Drop `widget`'s interest in an equity ticker.
    pub fn unsubscribe_from_stock(&self, symbol: &str, widget: &str) {
        let Some(key) = Feed::Equities.normalize_key(symbol) else {
            return;
        };
        self.registry
            .remove_interests_with(Feed::Equities, &widget.to_string(), &[key], |released| {
                self.send(ClientMessage::Unsubscribe {
                    symbols: released.to_vec(),
                });
            });
    }

    /// Register `widget`'s interest in a batch of option contracts.
    pub fn subscribe_to_options<S: AsRef<str>>(&self, contract_ids: &[S], widget: &str) {
        let keys = Feed::Options.normalize_keys(contract_ids);
        self.registry
            .add_interests_with(Feed::Options, &widget.to_string(), &keys, |new| {
                for msg in self.subscribe_frames(Feed::Options, new) {
                    self.send(msg);
                }
            });
    }

    /// Drop `widget`'s interest in a batch of option contracts.
    pub fn unsubscribe_from_options<S: AsRef<str>>(&self, contract_ids: &[S], widget: &str) {
        let keys = Feed::Options.normalize_keys(contract_ids);
        self.registry
            .remove_interests_with(Feed::Options, &widget.to_string(), &keys, |released| {
                self.send(ClientMessage::UnsubscribeOptions {
                    contract_ids: released.to_vec(),
                });
            });
    }

    // -------------------------------------------------------------------------
    // Connection loop
    // -------------------------------------------------------------------------

    async fn run(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(url = %self.config.url, error = %e, "Relay connection lost");
                }
            }
            self.detach();

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    url = %self.config.url,
                    attempts = policy.attempt_count(),
                    "Max relay reconnection attempts reached, giving up"
                );
                return;
            };

            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to relay"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.detach();
        tracing::info!(url = %self.config.url, "Relay client stopped");
    }

    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), ClientError> {
        let connected = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result?,
        };
        let (ws_stream, _response) = connected;
        let (mut write, mut read) = ws_stream.split();

        policy.reset();
        let mut outbound = self.attach();
        tracing::info!(url = %self.config.url, "Connected to relay");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(msg) = outbound.recv() => {
                    write.send(Message::Text(msg.to_json().into())).await?;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => return Err(ClientError::ConnectionClosed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    /// Install a fresh outbound queue and replay the held keys into it.
    fn attach(&self) -> mpsc::UnboundedReceiver<ClientMessage> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.registry.with_active_keys(|symbols, contract_ids| {
            let mut outbound = self.outbound.lock();
            let replay = self
                .subscribe_frames(Feed::Equities, &symbols)
                .into_iter()
                .chain(self.subscribe_frames(Feed::Options, &contract_ids));
            for msg in replay {
                let _ = tx.send(msg);
            }
            *outbound = Some(tx);
        });

        self.status_tx.send_if_modified(|connected| {
            let changed = !*connected;
            *connected = true;
            changed
        });
        rx
    }

    fn detach(&self) {
        self.outbound.lock().take();
        self.client_id.write().take();
        self.status_tx.send_if_modified(|connected| {
            let changed = *connected;
            *connected = false;
            changed
        });
    }

    /// Subscribe frames for `keys`, split to the relay's per-request cap.
    fn subscribe_frames(&self, feed: Feed, keys: &[SubscriptionKey]) -> Vec<ClientMessage> {
        keys.chunks(self.config.limits.for_feed(feed).max(1))
            .map(|chunk| match feed {
                Feed::Equities => ClientMessage::Subscribe {
                    symbols: chunk.to_vec(),
                },
                Feed::Options => ClientMessage::SubscribeOptions {
                    contract_ids: chunk.to_vec(),
                },
            })
            .collect()
    }

    fn send(&self, msg: ClientMessage) {
        match self.outbound.lock().as_ref() {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => {
                tracing::debug!(msg = ?msg, "Relay not connected, frame deferred to next replay");
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let msg = match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unparseable relay frame");
                return;
            }
        };

        match msg {
            ServerMessage::Quote { data, .. } => {
                self.store.put_quote(data.clone());
                self.hub.send_quote(data);
            }
            ServerMessage::OptionUpdate { data, .. } => {
                self.store.put_option(data.clone());
                self.hub.send_option_update(data);
            }
            ServerMessage::Connected { client_id, .. } => {
                tracing::info!(client_id = %client_id, "Relay assigned client id");
                *self.client_id.write() = Some(client_id);
            }
            ServerMessage::Error { message, .. } => {
                tracing::warn!(message = %message, "Relay rejected a frame");
            }
            other => tracing::debug!(kind = other.kind(), "Relay acknowledgement"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
