//! Vendor WebSocket Message Types
//!
//! Wire types for the Polygon-style market data WebSocket used by both the
//! stocks and the options cluster.
//!
//! # Inbound
//!
//! Every text frame is a JSON array of events, each discriminated by `ev`:
//!
//! ```json
//! [{"ev":"status","status":"auth_success","message":"authenticated"}]
//! [{"ev":"A","sym":"AAPL","v":4110,"o":150.1,"c":150.3,"h":150.4,"l":150.0,"s":1700000000000,"e":1700000001000}]
//! ```
//!
//! # Outbound
//!
//! Control requests are `{"action": ..., "params": ...}` objects:
//!
//! ```json
//! {"action":"auth","params":"<api key>"}
//! {"action":"subscribe","params":"A.AAPL,A.MSFT"}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::streaming::RawTick;
use crate::domain::subscription::{Feed, SubscriptionKey};

/// Channel prefix used for subscriptions (per-second aggregates).
pub const AGGREGATE_CHANNEL: &str = "A";

// =============================================================================
// Control Requests (outbound)
// =============================================================================

/// Control action sent to the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Authenticate with an API key.
    Auth,
    /// Add channels.
    Subscribe,
    /// Remove channels.
    Unsubscribe,
}

/// Control request frame.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Action to perform.
    pub action: ControlAction,
    /// API key for `auth`, comma-separated channel list otherwise.
    pub params: String,
}

impl ControlRequest {
    /// Authentication request.
    #[must_use]
    pub fn auth(api_key: impl Into<String>) -> Self {
        Self {
            action: ControlAction::Auth,
            params: api_key.into(),
        }
    }

    /// Subscribe to the aggregate channel of every key.
    #[must_use]
    pub fn subscribe(keys: &[SubscriptionKey]) -> Self {
        Self {
            action: ControlAction::Subscribe,
            params: channel_list(keys),
        }
    }

    /// Unsubscribe from the aggregate channel of every key.
    #[must_use]
    pub fn unsubscribe(keys: &[SubscriptionKey]) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            params: channel_list(keys),
        }
    }

    /// Serialize the request to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen with valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl std::fmt::Debug for ControlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = match self.action {
            ControlAction::Auth => "[REDACTED]",
            ControlAction::Subscribe | ControlAction::Unsubscribe => self.params.as_str(),
        };
        f.debug_struct("ControlRequest")
            .field("action", &self.action)
            .field("params", &params)
            .finish()
    }
}

fn channel_list(keys: &[SubscriptionKey]) -> String {
    keys.iter()
        .map(|k| format!("{AGGREGATE_CHANNEL}.{k}"))
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Events (inbound)
// =============================================================================

/// Aggregate bar (`ev` = `A` per second, `AM` per minute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMessage {
    /// Ticker or contract id.
    pub sym: String,
    /// Window volume.
    #[serde(default)]
    pub v: f64,
    /// Open.
    pub o: f64,
    /// Close.
    pub c: f64,
    /// High.
    pub h: f64,
    /// Low.
    pub l: f64,
    /// Volume-weighted average price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vw: Option<f64>,
    /// Window start (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,
    /// Window end (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<i64>,
}

/// Trade (`ev` = `T`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMessage {
    /// Ticker or contract id.
    pub sym: String,
    /// Price.
    pub p: f64,
    /// Size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<f64>,
    /// Timestamp (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
}

/// Top-of-book quote (`ev` = `Q`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteMessage {
    /// Ticker or contract id.
    pub sym: String,
    /// Bid price.
    pub bp: f64,
    /// Ask price.
    pub ap: f64,
    /// Bid size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bs: Option<f64>,
    /// Ask size.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub ask_size: Option<f64>,
    /// Timestamp (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
}

/// Status kinds the vendor reports on the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Transport accepted.
    Connected,
    /// API key accepted.
    AuthSuccess,
    /// API key rejected.
    AuthFailed,
    /// A subscribe/unsubscribe was applied.
    Success,
    /// Too many concurrent connections for this key.
    MaxConnections,
    /// Generic error.
    Error,
    /// Anything else.
    #[serde(other)]
    Other,
}

/// Status event (`ev` = `status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Status kind.
    pub status: StatusKind,
    /// Free-form description.
    #[serde(default)]
    pub message: String,
}

/// A decoded vendor event.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorMessage {
    /// Per-second aggregate.
    Aggregate(AggregateMessage),
    /// Per-minute aggregate.
    MinuteAggregate(AggregateMessage),
    /// Trade.
    Trade(TradeMessage),
    /// Quote.
    Quote(QuoteMessage),
    /// Control-plane status.
    Status(StatusMessage),
    /// An event type this relay does not consume.
    Unknown(String),
}

impl VendorMessage {
    /// Convert a market event into a tick for `feed`.
    ///
    /// Returns `None` for status and unknown events. When the event carries
    /// no usable timestamp, `fallback_ms` is used.
    #[must_use]
    pub fn into_tick(self, feed: Feed, fallback_ms: i64) -> Option<RawTick> {
        match self {
            Self::Aggregate(a) | Self::MinuteAggregate(a) => Some(RawTick {
                feed,
                key: a.sym,
                price: a.c,
                open: a.o,
                high: a.h,
                low: a.l,
                volume: a.v,
                timestamp_ms: a.e.or(a.s).unwrap_or(fallback_ms),
            }),
            Self::Trade(t) => Some(RawTick {
                feed,
                key: t.sym,
                price: t.p,
                open: t.p,
                high: t.p,
                low: t.p,
                volume: 0.0,
                timestamp_ms: t.t.unwrap_or(fallback_ms),
            }),
            Self::Quote(q) => {
                let mid = (q.bp + q.ap) / 2.0;
                Some(RawTick {
                    feed,
                    key: q.sym,
                    price: mid,
                    open: mid,
                    high: mid,
                    low: mid,
                    volume: 0.0,
                    timestamp_ms: q.t.unwrap_or(fallback_ms),
                })
            }
            Self::Status(_) | Self::Unknown(_) => None,
        }
    }

    /// The `ev` discriminator.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Aggregate(_) => "A",
            Self::MinuteAggregate(_) => "AM",
            Self::Trade(_) => "T",
            Self::Quote(_) => "Q",
            Self::Status(_) => "status",
            Self::Unknown(ev) => ev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<SubscriptionKey> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn auth_request_serialization() {
        let json = ControlRequest::auth("secret-key").to_json().unwrap();
        assert_eq!(json, r#"{"action":"auth","params":"secret-key"}"#);
    }

    #[test]
    fn subscribe_request_joins_channels() {
        let json = ControlRequest::subscribe(&keys(&["AAPL", "MSFT"]))
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"action":"subscribe","params":"A.AAPL,A.MSFT"}"#);
    }

    #[test]
    fn unsubscribe_request_option_contract() {
        let json = ControlRequest::unsubscribe(&keys(&["O:SPY251219C00650000"]))
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"action":"unsubscribe","params":"A.O:SPY251219C00650000"}"#
        );
    }

    #[test]
    fn auth_request_debug_redacts_key() {
        let debug = format!("{:?}", ControlRequest::auth("super-secret"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn status_kind_unknown_maps_to_other() {
        let msg: StatusMessage =
            serde_json::from_str(r#"{"status":"something_new","message":"x"}"#).unwrap();
        assert_eq!(msg.status, StatusKind::Other);
    }

    #[test]
    fn aggregate_tick_prefers_end_timestamp() {
        let agg = AggregateMessage {
            sym: "AAPL".to_string(),
            v: 100.0,
            o: 1.0,
            c: 2.0,
            h: 3.0,
            l: 0.5,
            vw: None,
            s: Some(10),
            e: Some(20),
        };

        let tick = VendorMessage::Aggregate(agg.clone())
            .into_tick(Feed::Equities, 99)
            .unwrap();
        assert_eq!(tick.timestamp_ms, 20);
        assert!((tick.price - 2.0).abs() < f64::EPSILON);

        let start_only = AggregateMessage { e: None, ..agg.clone() };
        let tick = VendorMessage::MinuteAggregate(start_only)
            .into_tick(Feed::Equities, 99)
            .unwrap();
        assert_eq!(tick.timestamp_ms, 10);

        let neither = AggregateMessage { e: None, s: None, ..agg };
        let tick = VendorMessage::Aggregate(neither)
            .into_tick(Feed::Equities, 99)
            .unwrap();
        assert_eq!(tick.timestamp_ms, 99);
    }

    #[test]
    fn quote_tick_uses_mid_price() {
        let quote = QuoteMessage {
            sym: "MSFT".to_string(),
            bp: 10.0,
            ap: 10.5,
            bs: Some(1.0),
            ask_size: Some(2.0),
            t: Some(5),
        };

        let tick = VendorMessage::Quote(quote)
            .into_tick(Feed::Equities, 0)
            .unwrap();

        assert!((tick.price - 10.25).abs() < f64::EPSILON);
        assert!(tick.volume.abs() < f64::EPSILON);
    }

    #[test]
    fn trade_tick_flattens_ohlc() {
        let trade = TradeMessage {
            sym: "SPY".to_string(),
            p: 500.0,
            s: Some(10.0),
            t: Some(7),
        };

        let tick = VendorMessage::Trade(trade)
            .into_tick(Feed::Equities, 0)
            .unwrap();

        assert!((tick.open - 500.0).abs() < f64::EPSILON);
        assert!((tick.low - 500.0).abs() < f64::EPSILON);
        assert_eq!(tick.timestamp_ms, 7);
    }

    #[test]
    fn status_is_not_a_tick() {
        let status = VendorMessage::Status(StatusMessage {
            status: StatusKind::Connected,
            message: String::new(),
        });
        assert!(status.into_tick(Feed::Options, 0).is_none());
    }
}
