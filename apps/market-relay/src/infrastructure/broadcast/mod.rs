//! Broadcast Channel Adapters
//!
//! Fan-out of relay updates to local consumers on the client side, using
//! tokio broadcast channels.
//!
//! The [`UpdateHub`] keeps one channel per update kind:
//! - `quote` frames for equities
//! - `option_update` frames for option contracts
//!
//! Slow receivers lag and skip instead of blocking the connection task.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::protocol::{OptionUpdateData, QuoteData};

// =============================================================================
// Configuration
// =============================================================================

/// Channel capacities for the update hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateHubConfig {
    /// Capacity for the equity quote channel.
    pub quotes_capacity: usize,
    /// Capacity for the option update channel.
    pub option_updates_capacity: usize,
}

impl Default for UpdateHubConfig {
    fn default() -> Self {
        Self {
            quotes_capacity: 10_000,
            option_updates_capacity: 50_000,
        }
    }
}

// =============================================================================
// Update Hub
// =============================================================================

/// Broadcast channels for updates received from the relay.
///
/// # Example
///
/// ```rust
/// use market_relay::infrastructure::broadcast::UpdateHub;
///
/// let hub = UpdateHub::with_defaults();
/// let _rx = hub.quotes_rx();
/// assert_eq!(hub.stats().quotes_receivers, 1);
/// ```
#[derive(Debug)]
pub struct UpdateHub {
    quotes_tx: broadcast::Sender<QuoteData>,
    option_updates_tx: broadcast::Sender<OptionUpdateData>,
}

impl UpdateHub {
    /// Create a hub with the given capacities.
    #[must_use]
    pub fn new(config: UpdateHubConfig) -> Self {
        Self {
            quotes_tx: broadcast::channel(config.quotes_capacity).0,
            option_updates_tx: broadcast::channel(config.option_updates_capacity).0,
        }
    }

    /// Create a hub with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(UpdateHubConfig::default())
    }

    /// Publish an equity quote.
    ///
    /// Returns the number of receivers, or `None` when nobody listens.
    pub fn send_quote(&self, quote: QuoteData) -> Option<usize> {
        self.quotes_tx.send(quote).ok()
    }

    /// New receiver for equity quotes.
    #[must_use]
    pub fn quotes_rx(&self) -> broadcast::Receiver<QuoteData> {
        self.quotes_tx.subscribe()
    }

    /// Publish an option update.
    ///
    /// Returns the number of receivers, or `None` when nobody listens.
    pub fn send_option_update(&self, update: OptionUpdateData) -> Option<usize> {
        self.option_updates_tx.send(update).ok()
    }

    /// New receiver for option updates.
    #[must_use]
    pub fn option_updates_rx(&self) -> broadcast::Receiver<OptionUpdateData> {
        self.option_updates_tx.subscribe()
    }

    /// Receiver counts per channel.
    #[must_use]
    pub fn stats(&self) -> UpdateHubStats {
        UpdateHubStats {
            quotes_receivers: self.quotes_tx.receiver_count(),
            option_updates_receivers: self.option_updates_tx.receiver_count(),
        }
    }
}

/// Shared update hub reference.
pub type SharedUpdateHub = Arc<UpdateHub>;

/// Receiver counts of the update hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateHubStats {
    /// Equity quote receivers.
    pub quotes_receivers: usize,
    /// Option update receivers.
    pub option_updates_receivers: usize,
}

impl UpdateHubStats {
    /// Receivers across both channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.quotes_receivers + self.option_updates_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(symbol: &str, price: f64) -> QuoteData {
        QuoteData {
            symbol: symbol.to_string(),
            price,
            change: 0.0,
            change_percent: 0.0,
            volume: 100.0,
            timestamp: 1_700_000_000_000,
        }
    }

    fn option_update(contract_id: &str) -> OptionUpdateData {
        OptionUpdateData {
            contract_id: contract_id.to_string(),
            price: 1.5,
            open: 1.4,
            high: 1.6,
            low: 1.3,
            change: 0.1,
            change_percent: 7.1,
            volume: 20.0,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn receiver_counts_track_subscriptions() {
        let hub = UpdateHub::with_defaults();
        assert_eq!(hub.stats(), UpdateHubStats::default());

        let rx1 = hub.quotes_rx();
        let _rx2 = hub.option_updates_rx();
        assert_eq!(hub.stats().total_receivers(), 2);

        drop(rx1);
        assert_eq!(hub.stats().quotes_receivers, 0);
    }

    #[test]
    fn send_without_receivers_returns_none() {
        let hub = UpdateHub::with_defaults();
        assert!(hub.send_quote(quote("AAPL", 1.0)).is_none());
        assert!(hub.send_option_update(option_update("O:X")).is_none());
    }

    #[tokio::test]
    async fn every_receiver_gets_the_update() {
        let hub = UpdateHub::with_defaults();
        let mut rx1 = hub.quotes_rx();
        let mut rx2 = hub.quotes_rx();

        assert_eq!(hub.send_quote(quote("AAPL", 190.5)), Some(2));

        assert_eq!(rx1.recv().await.unwrap().symbol, "AAPL");
        assert!((rx2.recv().await.unwrap().price - 190.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn slow_receiver_lags_instead_of_blocking() {
        let hub = UpdateHub::new(UpdateHubConfig {
            quotes_capacity: 2,
            option_updates_capacity: 2,
        });
        let mut rx = hub.option_updates_rx();

        for i in 0..5 {
            hub.send_option_update(option_update(&format!("O:X{i}")));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().contract_id, "O:X3");
    }
}
