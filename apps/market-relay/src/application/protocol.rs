//! Downstream WebSocket protocol message types.
//!
//! Defines the JSON message format spoken between the relay and its
//! clients. Every frame is a JSON object discriminated by `type`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::streaming::Tick;

// ============================================================================
// Errors
// ============================================================================

/// A client frame that could not be turned into a [`ClientMessage`].
///
/// The `Display` text is sent back verbatim in an `error` frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not a JSON object.
    #[error("Invalid message format")]
    InvalidJson,

    /// The frame has no string `type` field.
    #[error("Missing message type")]
    MissingType,

    /// The `type` field names no known message.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// The `type` is known but a field has the wrong shape.
    #[error("Invalid {kind} message: {reason}")]
    InvalidPayload {
        /// The message type.
        kind: String,
        /// Deserializer error.
        reason: String,
    },

    /// Binary frames are not part of the protocol.
    #[error("Binary frames are not supported")]
    BinaryFrame,
}

impl ProtocolError {
    /// Metric label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingType => "missing_type",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::BinaryFrame => "binary",
        }
    }
}

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to equity quotes.
    Subscribe {
        /// Tickers to subscribe to.
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Unsubscribe from equity quotes.
    Unsubscribe {
        /// Tickers to unsubscribe from.
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Subscribe to option contract updates.
    SubscribeOptions {
        /// Contract ids to subscribe to.
        #[serde(default, rename = "contractIds")]
        contract_ids: Vec<String>,
    },
    /// Unsubscribe from option contract updates.
    UnsubscribeOptions {
        /// Contract ids to unsubscribe from.
        #[serde(default, rename = "contractIds")]
        contract_ids: Vec<String>,
    },
    /// Application-level keepalive.
    Ping,
}

const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "subscribe",
    "unsubscribe",
    "subscribe_options",
    "unsubscribe_options",
    "ping",
];

impl ClientMessage {
    /// Parse a text frame, classifying failures for the `error` reply.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the frame is not a JSON object, has
    /// no `type`, names an unknown type, or carries mistyped fields.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;

        if !value.is_object() {
            return Err(ProtocolError::InvalidJson);
        }

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }

    /// Encode for the wire.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to client. Every variant carries `timestamp`
/// in milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once when the connection opens.
    Connected {
        /// Id assigned to this connection.
        client_id: String,
        /// Human-readable greeting.
        message: String,
        /// Send time.
        timestamp: i64,
    },
    /// Acknowledges `subscribe`.
    Subscribed {
        /// Accepted tickers.
        data: SymbolsAck,
        /// Send time.
        timestamp: i64,
    },
    /// Acknowledges `unsubscribe`.
    Unsubscribed {
        /// Released tickers.
        data: SymbolsAck,
        /// Send time.
        timestamp: i64,
    },
    /// Acknowledges `subscribe_options`.
    SubscribedOptions {
        /// Accepted contract ids.
        data: ContractsAck,
        /// Send time.
        timestamp: i64,
    },
    /// Acknowledges `unsubscribe_options`.
    UnsubscribedOptions {
        /// Released contract ids.
        data: ContractsAck,
        /// Send time.
        timestamp: i64,
    },
    /// Equity price update.
    Quote {
        /// Quote payload.
        data: QuoteData,
        /// Send time.
        timestamp: i64,
    },
    /// Option contract price update.
    OptionUpdate {
        /// Option payload.
        data: OptionUpdateData,
        /// Send time.
        timestamp: i64,
    },
    /// A client frame was rejected. The connection stays open.
    Error {
        /// What went wrong.
        message: String,
        /// Send time.
        timestamp: i64,
    },
    /// Reply to `ping`.
    Pong {
        /// Send time.
        timestamp: i64,
    },
}

/// Payload of `subscribed` / `unsubscribed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolsAck {
    /// Tickers.
    pub symbols: Vec<String>,
}

/// Payload of `subscribed_options` / `unsubscribed_options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractsAck {
    /// Contract ids.
    pub contract_ids: Vec<String>,
}

/// Payload of a `quote` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteData {
    /// Ticker.
    pub symbol: String,
    /// Last price.
    pub price: f64,
    /// Delta against the previous tick.
    pub change: f64,
    /// Delta as a percentage of the previous price.
    pub change_percent: f64,
    /// Volume.
    pub volume: f64,
    /// Event time.
    pub timestamp: i64,
}

/// Payload of an `option_update` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionUpdateData {
    /// Contract id.
    pub contract_id: String,
    /// Last price.
    pub price: f64,
    /// Window open.
    pub open: f64,
    /// Window high.
    pub high: f64,
    /// Window low.
    pub low: f64,
    /// Delta against the previous tick.
    pub change: f64,
    /// Delta as a percentage of the previous price.
    pub change_percent: f64,
    /// Volume.
    pub volume: f64,
    /// Event time.
    pub timestamp: i64,
}

impl From<&Tick> for QuoteData {
    fn from(tick: &Tick) -> Self {
        Self {
            symbol: tick.raw.key.clone(),
            price: tick.raw.price,
            change: tick.change,
            change_percent: tick.change_percent,
            volume: tick.raw.volume,
            timestamp: tick.raw.timestamp_ms,
        }
    }
}

impl From<&Tick> for OptionUpdateData {
    fn from(tick: &Tick) -> Self {
        Self {
            contract_id: tick.raw.key.clone(),
            price: tick.raw.price,
            open: tick.raw.open,
            high: tick.raw.high,
            low: tick.raw.low,
            change: tick.change,
            change_percent: tick.change_percent,
            volume: tick.raw.volume,
            timestamp: tick.raw.timestamp_ms,
        }
    }
}

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ServerMessage {
    /// `connected` greeting for a new client.
    #[must_use]
    pub fn connected(client_id: impl Into<String>) -> Self {
        Self::Connected {
            client_id: client_id.into(),
            message: "Connected to FinanceDash relay".to_string(),
            timestamp: now_ms(),
        }
    }

    /// `error` frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: now_ms(),
        }
    }

    /// `pong` frame.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_ms(),
        }
    }

    /// `subscribed` acknowledgement.
    #[must_use]
    pub fn subscribed(symbols: Vec<String>) -> Self {
        Self::Subscribed {
            data: SymbolsAck { symbols },
            timestamp: now_ms(),
        }
    }

    /// `unsubscribed` acknowledgement.
    #[must_use]
    pub fn unsubscribed(symbols: Vec<String>) -> Self {
        Self::Unsubscribed {
            data: SymbolsAck { symbols },
            timestamp: now_ms(),
        }
    }

    /// `subscribed_options` acknowledgement.
    #[must_use]
    pub fn subscribed_options(contract_ids: Vec<String>) -> Self {
        Self::SubscribedOptions {
            data: ContractsAck { contract_ids },
            timestamp: now_ms(),
        }
    }

    /// `unsubscribed_options` acknowledgement.
    #[must_use]
    pub fn unsubscribed_options(contract_ids: Vec<String>) -> Self {
        Self::UnsubscribedOptions {
            data: ContractsAck { contract_ids },
            timestamp: now_ms(),
        }
    }

    /// `quote` frame for an equity tick.
    #[must_use]
    pub fn quote(tick: &Tick) -> Self {
        Self::Quote {
            data: QuoteData::from(tick),
            timestamp: now_ms(),
        }
    }

    /// `option_update` frame for an option tick.
    #[must_use]
    pub fn option_update(tick: &Tick) -> Self {
        Self::OptionUpdate {
            data: OptionUpdateData::from(tick),
            timestamp: now_ms(),
        }
    }

    /// Wire `type` tag, for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::SubscribedOptions { .. } => "subscribed_options",
            Self::UnsubscribedOptions { .. } => "unsubscribed_options",
            Self::Quote { .. } => "quote",
            Self::OptionUpdate { .. } => "option_update",
            Self::Error { .. } => "error",
            Self::Pong { .. } => "pong",
        }
    }

    /// Encode for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (non-finite floats).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
