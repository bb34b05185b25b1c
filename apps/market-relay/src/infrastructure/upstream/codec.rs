//! Stream Codec Module
//!
//! JSON decoding for the vendor market data stream.
//!
//! Frames are arrays of events. Each element is decoded on its own so one
//! malformed event does not discard its siblings; unknown `ev` types decode
//! to [`VendorMessage::Unknown`] rather than failing.

use crate::infrastructure::upstream::messages::{
    AggregateMessage, QuoteMessage, StatusMessage, TradeMessage, VendorMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Result of decoding one frame.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Events that decoded cleanly, in frame order.
    pub messages: Vec<VendorMessage>,
    /// Per-element failures, with their index in the frame.
    pub rejected: Vec<(usize, CodecError)>,
}

/// JSON codec for the vendor stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// Arrays are the normal shape; a bare object is accepted as a
    /// one-element frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, or is JSON but neither an
    /// array nor an object.
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;

        let elements = match value {
            serde_json::Value::Array(items) => items,
            obj @ serde_json::Value::Object(_) => vec![obj],
            other => {
                let preview: String = other.to_string().chars().take(50).collect();
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got: {preview}"
                )));
            }
        };

        let mut frame = DecodedFrame {
            messages: Vec::with_capacity(elements.len()),
            rejected: vec![],
        };

        for (index, element) in elements.into_iter().enumerate() {
            match Self::decode_event(element) {
                Ok(msg) => frame.messages.push(msg),
                Err(e) => frame.rejected.push((index, e)),
            }
        }

        Ok(frame)
    }

    /// Decode a single event object by its `ev` discriminator.
    fn decode_event(value: serde_json::Value) -> Result<VendorMessage, CodecError> {
        let ev = value
            .get("ev")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CodecError::InvalidFormat("event without `ev` field".to_string()))?
            .to_string();

        let message = match ev.as_str() {
            "A" => VendorMessage::Aggregate(serde_json::from_value::<AggregateMessage>(value)?),
            "AM" => {
                VendorMessage::MinuteAggregate(serde_json::from_value::<AggregateMessage>(value)?)
            }
            "T" => VendorMessage::Trade(serde_json::from_value::<TradeMessage>(value)?),
            "Q" => VendorMessage::Quote(serde_json::from_value::<QuoteMessage>(value)?),
            "status" => VendorMessage::Status(serde_json::from_value::<StatusMessage>(value)?),
            _ => VendorMessage::Unknown(ev),
        };

        Ok(message)
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}
