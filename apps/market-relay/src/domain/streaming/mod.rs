//! Market Data Streaming Types
//!
//! Core domain types for market data ticks. These types are codec-agnostic
//! and represent the canonical internal representation of a price update,
//! both as decoded from a vendor feed ([`RawTick`]) and as delivered to
//! downstream clients ([`Tick`]).

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::domain::subscription::{Feed, SubscriptionKey};

// =============================================================================
// Ticks
// =============================================================================

/// One price/volume update decoded from an upstream feed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTick {
    /// Feed partition the tick came from.
    pub feed: Feed,
    /// Equity ticker or option contract id.
    pub key: SubscriptionKey,
    /// Last (close) price.
    pub price: f64,
    /// Open price for the aggregate window.
    pub open: f64,
    /// High price for the aggregate window.
    pub high: f64,
    /// Low price for the aggregate window.
    pub low: f64,
    /// Volume for the aggregate window.
    pub volume: f64,
    /// Event time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// A [`RawTick`] enriched with tick-over-tick change.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// The underlying raw tick.
    pub raw: RawTick,
    /// Price delta against the previous tick for the same key.
    pub change: f64,
    /// `change` as a percentage of the previous price.
    pub change_percent: f64,
}

// =============================================================================
// Last Price Cache
// =============================================================================

/// Last observed price per `(feed, key)`.
///
/// The change reported for a tick is the delta against the previous tick
/// for the same key, not against a session open. The first tick for a key
/// has no baseline and reports zero change. A cached price of exactly zero
/// is treated as absent.
///
/// Entries are never evicted when subscriptions go away; a later
/// resubscription continues from the last known price.
#[derive(Debug, Default)]
pub struct LastPriceCache {
    prices: Mutex<HashMap<(Feed, SubscriptionKey), f64>>,
}

impl LastPriceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute change for `raw` and record its price as the new baseline.
    pub fn apply(&self, raw: RawTick) -> Tick {
        let previous = {
            let mut prices = self.prices.lock();
            prices.insert((raw.feed, raw.key.clone()), raw.price)
        };

        let baseline = match previous {
            Some(p) if p != 0.0 => p,
            _ => raw.price,
        };

        let change = raw.price - baseline;
        let change_percent = if baseline > 0.0 {
            change / baseline * 100.0
        } else {
            0.0
        };

        Tick {
            raw,
            change,
            change_percent,
        }
    }

    /// Last recorded price for a key.
    #[must_use]
    pub fn last_price(&self, feed: Feed, key: &str) -> Option<f64> {
        self.prices.lock().get(&(feed, key.to_string())).copied()
    }

    /// Number of keys with a recorded price.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.lock().len()
    }

    /// Whether no prices have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.lock().is_empty()
    }

    /// Forget every recorded price.
    pub fn clear(&self) {
        self.prices.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(feed: Feed, key: &str, price: f64) -> RawTick {
        RawTick {
            feed,
            key: key.to_string(),
            price,
            open: price,
            high: price,
            low: price,
            volume: 100.0,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn first_tick_reports_zero_change() {
        let cache = LastPriceCache::new();

        let t = cache.apply(tick(Feed::Equities, "AAPL", 150.0));

        assert!(t.change.abs() < f64::EPSILON);
        assert!(t.change_percent.abs() < f64::EPSILON);
        assert_eq!(cache.last_price(Feed::Equities, "AAPL"), Some(150.0));
    }

    #[test]
    fn second_tick_is_relative_to_first() {
        let cache = LastPriceCache::new();

        cache.apply(tick(Feed::Equities, "AAPL", 100.0));
        let t = cache.apply(tick(Feed::Equities, "AAPL", 102.0));

        assert!((t.change - 2.0).abs() < 1e-9);
        assert!((t.change_percent - 2.0).abs() < 1e-9);
    }

    #[test]
    fn change_is_rolling_not_session_based() {
        let cache = LastPriceCache::new();

        cache.apply(tick(Feed::Equities, "MSFT", 100.0));
        cache.apply(tick(Feed::Equities, "MSFT", 110.0));
        let t = cache.apply(tick(Feed::Equities, "MSFT", 99.0));

        assert!((t.change - (-11.0)).abs() < 1e-9);
        assert!((t.change_percent - (-10.0)).abs() < 1e-9);
    }

    #[test]
    fn zero_cached_price_is_treated_as_absent() {
        let cache = LastPriceCache::new();

        cache.apply(tick(Feed::Options, "O:X", 0.0));
        let t = cache.apply(tick(Feed::Options, "O:X", 1.25));

        assert!(t.change.abs() < f64::EPSILON);
        assert!(t.change_percent.abs() < f64::EPSILON);
    }

    #[test]
    fn feeds_do_not_share_baselines() {
        let cache = LastPriceCache::new();

        cache.apply(tick(Feed::Equities, "SPY", 500.0));
        let t = cache.apply(tick(Feed::Options, "SPY", 5.0));

        assert!(t.change.abs() < f64::EPSILON);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_resets_baselines() {
        let cache = LastPriceCache::new();

        cache.apply(tick(Feed::Equities, "AAPL", 100.0));
        cache.clear();

        assert!(cache.is_empty());
        let t = cache.apply(tick(Feed::Equities, "AAPL", 120.0));
        assert!(t.change.abs() < f64::EPSILON);
    }
}
