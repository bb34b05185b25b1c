//! Upstream Vendor Adapters
//!
//! WebSocket client for the vendor's market data clusters. One
//! [`UpstreamConnector`] runs per feed:
//!
//! - **Equities**: `wss://socket.massive.com/stocks`
//! - **Options**: `wss://socket.massive.com/options`
//!
//! Both speak the same JSON protocol and share the codec, auth tracking,
//! heartbeat and reconnect policy below.

pub mod auth;
pub mod codec;
pub mod connector;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use auth::{ApiKey, AuthError, AuthHandler, AuthProgress, AuthState};
pub use codec::{CodecError, DecodedFrame, JsonCodec};
pub use connector::{
    ConnectionState, UpstreamConfig, UpstreamConnector, UpstreamError, UpstreamEvent,
    UpstreamStats,
};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
pub use messages::*;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
