//! Application Services
//!
//! [`RelayService`] owns the downstream client table and orchestrates the
//! subscription registry, the last-price cache and the two upstream feeds.
//! It is transport-free: each client is represented by the sending half of
//! its outbound queue, and the socket task that owns the other half feeds
//! inbound frames back through [`RelayService::handle_frame`].
//!
//! Upstream subscribe and unsubscribe calls are made while the registry
//! partition lock that decided them is still held, so the connector sees
//! transitions for one feed in the order they happened.
//!
//! Client queues are bounded. A client whose queue is full is evicted: its
//! sender is dropped, which ends its socket task, and its keys are released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::UpstreamControl;
use crate::application::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::domain::streaming::{LastPriceCache, RawTick};
use crate::domain::subscription::{
    ClientId, Feed, SubscriptionKey, SubscriptionRegistry, TotalSubscriptionStats,
};

/// Sending half of a client's outbound queue.
pub type ClientSender = mpsc::Sender<ServerMessage>;

// =============================================================================
// Limits
// =============================================================================

/// Per-request caps on subscription batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayLimits {
    /// Keys beyond this count in one `subscribe` are silently dropped.
    pub max_symbols_per_subscribe: usize,
    /// Keys beyond this count in one `subscribe_options` are silently dropped.
    pub max_contracts_per_subscribe: usize,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_symbols_per_subscribe: 50,
            max_contracts_per_subscribe: 250,
        }
    }
}

impl RelayLimits {
    /// Cap for one subscribe request on `feed`.
    #[must_use]
    pub const fn for_feed(self, feed: Feed) -> usize {
        match feed {
            Feed::Equities => self.max_symbols_per_subscribe,
            Feed::Options => self.max_contracts_per_subscribe,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of fanning one tick out to interested clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Frames enqueued.
    pub delivered: usize,
    /// Interested clients whose queue was already closed.
    pub skipped: usize,
    /// Interested clients evicted because their queue was full.
    pub evicted: usize,
}

/// Snapshot for the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Connected clients.
    pub clients: usize,
    /// Registry sizes per feed.
    pub subscriptions: TotalSubscriptionStats,
    /// Keys with a cached last price.
    pub cached_prices: usize,
}

// =============================================================================
// Relay Service
// =============================================================================

/// Control-protocol handler and tick fan-out for downstream clients.
pub struct RelayService {
    registry: Arc<SubscriptionRegistry>,
    prices: LastPriceCache,
    clients: RwLock<HashMap<ClientId, ClientSender>>,
    equities: Arc<dyn UpstreamControl>,
    options: Arc<dyn UpstreamControl>,
    limits: RelayLimits,
}

impl std::fmt::Debug for RelayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayService")
            .field("clients", &self.clients.read().len())
            .field("registry", &self.registry)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RelayService {
    /// Create a relay service over a shared registry and two feed controls.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        equities: Arc<dyn UpstreamControl>,
        options: Arc<dyn UpstreamControl>,
        limits: RelayLimits,
    ) -> Self {
        Self {
            registry,
            prices: LastPriceCache::new(),
            clients: RwLock::new(HashMap::new()),
            equities,
            options,
            limits,
        }
    }

    /// The registry backing this service.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The last-price cache.
    #[must_use]
    pub const fn prices(&self) -> &LastPriceCache {
        &self.prices
    }

    /// Register a newly opened connection and greet it.
    ///
    /// Returns the assigned client id (32 lowercase hex characters).
    pub fn register_client(&self, tx: ClientSender) -> ClientId {
        let client_id = uuid::Uuid::new_v4().simple().to_string();

        let _ = tx.try_send(ServerMessage::connected(&client_id));

        let total = {
            let mut clients = self.clients.write();
            clients.insert(client_id.clone(), tx);
            clients.len()
        };

        tracing::info!(client_id = %client_id, total, "Client connected");
        client_id
    }

    /// Handle one inbound text frame.
    ///
    /// Malformed frames are answered with an `error` frame and reported to
    /// the caller; the connection stays usable either way.
    ///
    /// # Errors
    ///
    /// Returns the [`ProtocolError`] that was sent to the client.
    pub fn handle_frame(&self, client_id: &str, text: &str) -> Result<(), ProtocolError> {
        match ClientMessage::parse(text) {
            Ok(msg) => {
                self.handle_message(client_id, msg);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "Rejected client frame");
                self.send_to(client_id, ServerMessage::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Reject a frame the transport could not pass on as text.
    pub fn reject(&self, client_id: &str, error: &ProtocolError) {
        self.send_to(client_id, ServerMessage::error(error.to_string()));
    }

    /// Apply a parsed control message.
    pub fn handle_message(&self, client_id: &str, msg: ClientMessage) {
        if !self.clients.read().contains_key(client_id) {
            tracing::debug!(client_id = %client_id, "Message for unknown client ignored");
            return;
        }

        let reply = match msg {
            ClientMessage::Subscribe { symbols } => {
                ServerMessage::subscribed(self.subscribe(client_id, Feed::Equities, &symbols))
            }
            ClientMessage::Unsubscribe { symbols } => {
                ServerMessage::unsubscribed(self.unsubscribe(client_id, Feed::Equities, &symbols))
            }
            ClientMessage::SubscribeOptions { contract_ids } => ServerMessage::subscribed_options(
                self.subscribe(client_id, Feed::Options, &contract_ids),
            ),
            ClientMessage::UnsubscribeOptions { contract_ids } => {
                ServerMessage::unsubscribed_options(self.unsubscribe(
                    client_id,
                    Feed::Options,
                    &contract_ids,
                ))
            }
            ClientMessage::Ping => ServerMessage::pong(),
        };

        self.send_to(client_id, reply);
    }

    /// Drop a client and release everything it held.
    ///
    /// Returns the keys that lost their last interested client, which have
    /// already been unsubscribed upstream.
    pub fn disconnect_client(&self, client_id: &str) -> HashMap<Feed, Vec<SubscriptionKey>> {
        let total = {
            let mut clients = self.clients.write();
            if clients.remove(client_id).is_none() {
                return HashMap::new();
            }
            clients.len()
        };

        let released = self
            .registry
            .release_client_with(&client_id.to_string(), |feed, keys| {
                tracing::debug!(
                    client_id = %client_id,
                    feed = %feed,
                    count = keys.len(),
                    "Releasing upstream subscriptions"
                );
                self.upstream(feed).unsubscribe(keys);
            });

        tracing::info!(client_id = %client_id, total, "Client disconnected");
        released
    }

    /// Fan one upstream tick out to every interested client.
    ///
    /// The last-price cache is updated even when nobody is listening.
    pub fn publish_tick(&self, raw: RawTick) -> Delivery {
        let tick = self.prices.apply(raw);

        let interested = self
            .registry
            .clients_interested_in(tick.raw.feed, &tick.raw.key);
        if interested.is_empty() {
            return Delivery::default();
        }

        let msg = match tick.raw.feed {
            Feed::Equities => ServerMessage::quote(&tick),
            Feed::Options => ServerMessage::option_update(&tick),
        };

        let mut delivery = Delivery::default();
        let mut overflowed = Vec::new();
        {
            let clients = self.clients.read();
            for client_id in &interested {
                match clients.get(client_id).map(|tx| tx.try_send(msg.clone())) {
                    Some(Ok(())) => delivery.delivered += 1,
                    Some(Err(TrySendError::Full(_))) => overflowed.push(client_id.clone()),
                    Some(Err(TrySendError::Closed(_))) | None => delivery.skipped += 1,
                }
            }
        }

        delivery.evicted = overflowed.len();
        for client_id in &overflowed {
            self.evict(client_id);
        }

        tracing::trace!(
            key = %tick.raw.key,
            feed = %tick.raw.feed,
            delivered = delivery.delivered,
            skipped = delivery.skipped,
            evicted = delivery.evicted,
            "Tick fanned out"
        );
        delivery
    }

    /// Whether `client_id` is still registered.
    #[must_use]
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.read().contains_key(client_id)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Snapshot for the stats endpoint.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            clients: self.client_count(),
            subscriptions: self.registry.total_stats(),
            cached_prices: self.prices.len(),
        }
    }

    fn subscribe(&self, client_id: &str, feed: Feed, raw: &[String]) -> Vec<SubscriptionKey> {
        let mut keys = feed.normalize_keys(raw);
        let limit = self.limits.for_feed(feed);
        if keys.len() > limit {
            tracing::debug!(
                client_id = %client_id,
                feed = %feed,
                requested = keys.len(),
                limit,
                "Truncating subscription request"
            );
            keys.truncate(limit);
        }

        self.registry
            .add_interests_with(feed, &client_id.to_string(), &keys, |new_keys| {
                tracing::debug!(feed = %feed, keys = ?new_keys, "Subscribing upstream");
                self.upstream(feed).subscribe(new_keys);
            });

        keys
    }

    fn unsubscribe(&self, client_id: &str, feed: Feed, raw: &[String]) -> Vec<SubscriptionKey> {
        let keys = feed.normalize_keys(raw);

        self.registry
            .remove_interests_with(feed, &client_id.to_string(), &keys, |released| {
                tracing::debug!(feed = %feed, keys = ?released, "Unsubscribing upstream");
                self.upstream(feed).unsubscribe(released);
            });

        keys
    }

    fn send_to(&self, client_id: &str, msg: ServerMessage) {
        let outcome = self.clients.read().get(client_id).map(|tx| tx.try_send(msg));
        if let Some(Err(TrySendError::Full(_))) = outcome {
            self.evict(client_id);
        }
    }

    fn evict(&self, client_id: &str) {
        tracing::warn!(client_id = %client_id, "Client queue full, evicting");
        self.disconnect_client(client_id);
    }

    fn upstream(&self, feed: Feed) -> &dyn UpstreamControl {
        match feed {
            Feed::Equities => self.equities.as_ref(),
            Feed::Options => self.options.as_ref(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockUpstreamControl;

    fn keys(list: &[&str]) -> Vec<SubscriptionKey> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn quiet() -> Arc<MockUpstreamControl> {
        let mut mock = MockUpstreamControl::new();
        mock.expect_subscribe().return_const(());
        mock.expect_unsubscribe().return_const(());
        Arc::new(mock)
    }

    fn service(
        equities: Arc<MockUpstreamControl>,
        options: Arc<MockUpstreamControl>,
    ) -> RelayService {
        RelayService::new(
            Arc::new(SubscriptionRegistry::new()),
            equities,
            options,
            RelayLimits::default(),
        )
    }

    fn connect(svc: &RelayService) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        connect_with_capacity(svc, 64)
    }

    fn connect_with_capacity(
        svc: &RelayService,
        capacity: usize,
    ) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        let (tx, mut rx) = mpsc::channel(capacity);
        let id = svc.register_client(tx);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Connected { .. })));
        (id, rx)
    }

    fn raw(feed: Feed, key: &str, price: f64) -> RawTick {
        RawTick {
            feed,
            key: key.to_string(),
            price,
            open: price,
            high: price,
            low: price,
            volume: 10.0,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn client_ids_are_32_hex_chars() {
        let svc = service(quiet(), quiet());
        let (id, _rx) = connect(&svc);

        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn shared_symbol_subscribes_upstream_once() {
        let mut equities = MockUpstreamControl::new();
        equities
            .expect_subscribe()
            .withf(|k: &[SubscriptionKey]| k == keys(&["AAPL"]).as_slice())
            .times(1)
            .return_const(());
        equities
            .expect_unsubscribe()
            .withf(|k: &[SubscriptionKey]| k == keys(&["AAPL"]).as_slice())
            .times(1)
            .return_const(());

        let svc = service(Arc::new(equities), quiet());
        let (a, _ra) = connect(&svc);
        let (b, _rb) = connect(&svc);

        svc.handle_frame(&a, r#"{"type":"subscribe","symbols":["aapl"]}"#).unwrap();
        svc.handle_frame(&b, r#"{"type":"subscribe","symbols":["AAPL"]}"#).unwrap();

        svc.disconnect_client(&a);
        svc.disconnect_client(&b);
    }

    #[test]
    fn subscribe_acknowledges_truncated_normalized_list() {
        let svc = service(quiet(), quiet());
        let (id, mut rx) = connect(&svc);

        let symbols: Vec<String> = (0..75).map(|i| format!("s{i}")).collect();
        svc.handle_message(&id, ClientMessage::Subscribe { symbols });

        match rx.try_recv().unwrap() {
            ServerMessage::Subscribed { data, .. } => {
                assert_eq!(data.symbols.len(), 50);
                assert_eq!(data.symbols[0], "S0");
                assert_eq!(data.symbols[49], "S49");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert_eq!(svc.registry().stats(Feed::Equities).key_count, 50);
    }

    #[test]
    fn options_use_their_own_limit_and_connector() {
        let mut options = MockUpstreamControl::new();
        options
            .expect_subscribe()
            .withf(|k: &[SubscriptionKey]| k.len() == 250)
            .times(1)
            .return_const(());

        let svc = service(quiet(), Arc::new(options));
        let (id, mut rx) = connect(&svc);

        let contract_ids: Vec<String> = (0..300).map(|i| format!("O:X{i}")).collect();
        svc.handle_message(&id, ClientMessage::SubscribeOptions { contract_ids });

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::SubscribedOptions { ref data, .. } if data.contract_ids.len() == 250
        ));
    }

    #[test]
    fn malformed_frame_yields_error_and_keeps_client() {
        let svc = service(quiet(), quiet());
        let (id, mut rx) = connect(&svc);

        assert_eq!(svc.handle_frame(&id, "{nope"), Err(ProtocolError::InvalidJson));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Error { ref message, .. } if message == "Invalid message format"
        ));

        svc.handle_frame(&id, r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Pong { .. }));
        assert_eq!(svc.client_count(), 1);
    }

    #[test]
    fn unsubscribe_of_unheld_key_is_acknowledged_without_upstream_call() {
        let mut equities = MockUpstreamControl::new();
        equities.expect_unsubscribe().never();

        let svc = service(Arc::new(equities), quiet());
        let (id, mut rx) = connect(&svc);

        svc.handle_frame(&id, r#"{"type":"unsubscribe","symbols":["TSLA"]}"#).unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Unsubscribed { ref data, .. } if data.symbols == keys(&["TSLA"])
        ));
    }

    #[test]
    fn disconnect_releases_only_unshared_keys() {
        let mut equities = MockUpstreamControl::new();
        equities.expect_subscribe().return_const(());
        equities
            .expect_unsubscribe()
            .withf(|k: &[SubscriptionKey]| k == keys(&["A"]).as_slice())
            .times(1)
            .return_const(());

        let svc = service(Arc::new(equities), quiet());
        let (c1, _r1) = connect(&svc);
        let (c2, _r2) = connect(&svc);

        svc.handle_frame(&c1, r#"{"type":"subscribe","symbols":["A","B"]}"#).unwrap();
        svc.handle_frame(&c2, r#"{"type":"subscribe","symbols":["B"]}"#).unwrap();

        let released = svc.disconnect_client(&c1);

        assert_eq!(released.get(&Feed::Equities), Some(&keys(&["A"])));
        assert_eq!(svc.registry().active_keys(Feed::Equities), keys(&["B"]));
        assert_eq!(svc.client_count(), 1);
    }

    #[test]
    fn disconnect_twice_is_noop() {
        let svc = service(quiet(), quiet());
        let (id, _rx) = connect(&svc);

        svc.disconnect_client(&id);
        assert!(svc.disconnect_client(&id).is_empty());
    }

    #[test]
    fn ticks_reach_only_interested_clients_with_rolling_change() {
        let svc = service(quiet(), quiet());
        let (a, mut ra) = connect(&svc);
        let (b, mut rb) = connect(&svc);

        svc.handle_message(&a, ClientMessage::Subscribe { symbols: keys(&["AAPL"]) });
        svc.handle_message(&b, ClientMessage::Subscribe { symbols: keys(&["MSFT"]) });
        let _ = ra.try_recv();
        let _ = rb.try_recv();

        let first = svc.publish_tick(raw(Feed::Equities, "AAPL", 100.0));
        let second = svc.publish_tick(raw(Feed::Equities, "AAPL", 101.0));
        assert_eq!(first.delivered, 1);
        assert_eq!(second.delivered, 1);

        match ra.try_recv().unwrap() {
            ServerMessage::Quote { data, .. } => assert!(data.change.abs() < f64::EPSILON),
            other => panic!("unexpected: {other:?}"),
        }
        match ra.try_recv().unwrap() {
            ServerMessage::Quote { data, .. } => {
                assert!((data.change - 1.0).abs() < 1e-9);
                assert!((data.change_percent - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn ticks_without_listeners_still_seed_the_cache() {
        let svc = service(quiet(), quiet());

        let delivery = svc.publish_tick(raw(Feed::Options, "O:X", 2.0));

        assert_eq!(delivery, Delivery::default());
        assert_eq!(svc.prices().last_price(Feed::Options, "O:X"), Some(2.0));
    }

    #[test]
    fn closed_queues_are_skipped() {
        let svc = service(quiet(), quiet());
        let (a, ra) = connect(&svc);
        let (b, mut rb) = connect(&svc);

        svc.handle_message(&a, ClientMessage::Subscribe { symbols: keys(&["AAPL"]) });
        svc.handle_message(&b, ClientMessage::Subscribe { symbols: keys(&["AAPL"]) });
        let _ = rb.try_recv();
        drop(ra);

        let delivery = svc.publish_tick(raw(Feed::Equities, "AAPL", 10.0));

        assert_eq!(
            delivery,
            Delivery {
                delivered: 1,
                skipped: 1,
                evicted: 0
            }
        );
        assert!(matches!(rb.try_recv().unwrap(), ServerMessage::Quote { .. }));
    }

    #[test]
    fn option_ticks_become_option_updates() {
        let svc = service(quiet(), quiet());
        let (id, mut rx) = connect(&svc);

        svc.handle_message(
            &id,
            ClientMessage::SubscribeOptions { contract_ids: keys(&["O:SPY251219C00650000"]) },
        );
        let _ = rx.try_recv();

        svc.publish_tick(raw(Feed::Options, "O:SPY251219C00650000", 4.0));

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::OptionUpdate { ref data, .. } if data.contract_id == "O:SPY251219C00650000"
        ));
    }

    #[test]
    fn stats_reflect_clients_and_keys() {
        let svc = service(quiet(), quiet());
        let (id, _rx) = connect(&svc);

        svc.handle_message(&id, ClientMessage::Subscribe { symbols: keys(&["A", "B"]) });
        svc.handle_message(&id, ClientMessage::SubscribeOptions { contract_ids: keys(&["O:X"]) });

        let stats = svc.stats();
        assert_eq!(stats.clients, 1);
        assert_eq!(stats.subscriptions.equities.key_count, 2);
        assert_eq!(stats.subscriptions.options.key_count, 1);
    }

    #[test]
    fn full_queue_evicts_client_and_releases_its_keys() {
        let mut equities = MockUpstreamControl::new();
        equities.expect_subscribe().return_const(());
        equities
            .expect_unsubscribe()
            .withf(|k: &[SubscriptionKey]| k == keys(&["AAPL"]).as_slice())
            .times(1)
            .return_const(());

        let svc = service(Arc::new(equities), quiet());
        let (slow, mut slow_rx) = connect_with_capacity(&svc, 1);
        let (fast, mut fast_rx) = connect(&svc);

        // The ack fills the slow client's single slot.
        svc.handle_message(&slow, ClientMessage::Subscribe { symbols: keys(&["AAPL", "MSFT"]) });
        svc.handle_message(&fast, ClientMessage::Subscribe { symbols: keys(&["MSFT"]) });
        let _ = fast_rx.try_recv();

        let first = svc.publish_tick(raw(Feed::Equities, "AAPL", 1.0));
        assert_eq!(
            first,
            Delivery {
                delivered: 0,
                skipped: 0,
                evicted: 1
            }
        );
        assert!(!svc.is_connected(&slow));
        assert_eq!(svc.client_count(), 1);
        assert_eq!(svc.registry().active_keys(Feed::Equities), keys(&["MSFT"]));

        // The buffered ack drains, then the queue reports closed.
        assert!(matches!(slow_rx.try_recv(), Ok(ServerMessage::Subscribed { .. })));
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        let second = svc.publish_tick(raw(Feed::Equities, "MSFT", 2.0));
        assert_eq!(second.delivered, 1);
        assert!(matches!(fast_rx.try_recv().unwrap(), ServerMessage::Quote { .. }));
    }

    #[test]
    fn full_queue_on_reply_evicts_client() {
        let svc = service(quiet(), quiet());
        let (id, _rx) = connect_with_capacity(&svc, 1);

        svc.handle_frame(&id, r#"{"type":"ping"}"#).unwrap();
        assert!(svc.is_connected(&id));

        svc.handle_frame(&id, r#"{"type":"ping"}"#).unwrap();
        assert!(!svc.is_connected(&id));
        assert_eq!(svc.client_count(), 0);
    }

    #[test]
    fn upstream_calls_run_under_the_partition_lock() {
        let registry = Arc::new(SubscriptionRegistry::new());

        let mut equities = MockUpstreamControl::new();
        let observed = Arc::clone(&registry);
        equities
            .expect_subscribe()
            .withf(move |_: &[SubscriptionKey]| observed.is_partition_locked(Feed::Equities))
            .times(1)
            .return_const(());
        let observed = Arc::clone(&registry);
        equities
            .expect_unsubscribe()
            .withf(move |_: &[SubscriptionKey]| observed.is_partition_locked(Feed::Equities))
            .times(1)
            .return_const(());

        let svc = RelayService::new(
            Arc::clone(&registry),
            Arc::new(equities),
            quiet(),
            RelayLimits::default(),
        );
        let (id, _rx) = connect(&svc);

        svc.handle_message(&id, ClientMessage::Subscribe { symbols: keys(&["AAPL"]) });
        svc.handle_message(&id, ClientMessage::Unsubscribe { symbols: keys(&["AAPL"]) });
    }
}
