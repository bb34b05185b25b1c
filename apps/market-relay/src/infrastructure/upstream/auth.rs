//! Vendor WebSocket Authentication
//!
//! Tracks the authentication handshake with the market data vendor.
//!
//! # Authentication Flow
//!
//! 1. Connect to WebSocket endpoint
//! 2. Send `{"action":"auth","params":"<api key>"}`
//! 3. Receive `[{"ev":"status","status":"connected",...}]`
//! 4. Receive `[{"ev":"status","status":"auth_success",...}]` or `auth_failed`
//!
//! The auth request is sent immediately on open, without waiting for the
//! `connected` status, and the subscription replay follows it in the same
//! burst. The vendor processes control frames in order.

use thiserror::Error;

use super::messages::{ControlRequest, StatusKind, StatusMessage};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The API key was rejected.
    #[error("authentication failed: {0}")]
    InvalidCredentials(String),

    /// Too many concurrent connections for this key.
    #[error("connection limit exceeded: {0}")]
    ConnectionLimitExceeded(String),

    /// Vendor-reported error.
    #[error("server error: {0}")]
    ServerError(String),

    /// Invalid credential material.
    #[error("invalid credentials: {0}")]
    InvalidMessage(String),
}

// =============================================================================
// Authentication State
// =============================================================================

/// Current state of authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Transport not open.
    #[default]
    Disconnected,

    /// Transport open, no auth request sent yet.
    Connected,

    /// Authentication request sent, awaiting response.
    Authenticating,

    /// Successfully authenticated.
    Authenticated,

    /// Authentication failed.
    Failed,
}

impl AuthState {
    /// Check if currently authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// What a status message meant for the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProgress {
    /// Vendor acknowledged the transport.
    Connected,
    /// Authentication completed on this message.
    Authenticated,
    /// A subscribe/unsubscribe acknowledgement or other informational status.
    Informational,
}

// =============================================================================
// API Key
// =============================================================================

/// Vendor API key.
///
/// The `Debug` implementation redacts the key for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Create a new API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or whitespace.
    pub fn new(key: impl Into<String>) -> Result<Self, AuthError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(AuthError::InvalidMessage(
                "API key cannot be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Get the raw key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

// =============================================================================
// Authentication Handler
// =============================================================================

/// Handles the authentication state machine for one vendor connection.
///
/// # Example
///
/// ```rust
/// use market_relay::infrastructure::upstream::auth::{ApiKey, AuthHandler};
/// use market_relay::infrastructure::upstream::messages::{StatusKind, StatusMessage};
///
/// let mut handler = AuthHandler::new(ApiKey::new("key").unwrap());
///
/// handler.on_connected();
/// let _request = handler.create_auth_request();
///
/// handler
///     .on_status(&StatusMessage { status: StatusKind::AuthSuccess, message: String::new() })
///     .unwrap();
/// assert!(handler.is_authenticated());
/// ```
#[derive(Debug)]
pub struct AuthHandler {
    api_key: ApiKey,
    state: AuthState,
}

impl AuthHandler {
    /// Create a new authentication handler.
    #[must_use]
    pub const fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            state: AuthState::Disconnected,
        }
    }

    /// Get the current authentication state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Check if currently authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Called when the WebSocket transport opens.
    pub const fn on_connected(&mut self) {
        self.state = AuthState::Connected;
    }

    /// Create the authentication request and mark the handshake started.
    #[must_use]
    pub fn create_auth_request(&mut self) -> ControlRequest {
        self.state = AuthState::Authenticating;
        ControlRequest::auth(self.api_key.expose())
    }

    /// Process a status message from the vendor.
    ///
    /// # Errors
    ///
    /// Returns an `AuthError` when the status reports a rejected key, a
    /// connection limit, or a vendor error.
    pub fn on_status(&mut self, msg: &StatusMessage) -> Result<AuthProgress, AuthError> {
        match msg.status {
            StatusKind::Connected => Ok(AuthProgress::Connected),
            StatusKind::AuthSuccess => {
                self.state = AuthState::Authenticated;
                Ok(AuthProgress::Authenticated)
            }
            StatusKind::AuthFailed => {
                self.state = AuthState::Failed;
                Err(AuthError::InvalidCredentials(msg.message.clone()))
            }
            StatusKind::MaxConnections => {
                self.state = AuthState::Failed;
                Err(AuthError::ConnectionLimitExceeded(msg.message.clone()))
            }
            StatusKind::Error => Err(AuthError::ServerError(msg.message.clone())),
            StatusKind::Success | StatusKind::Other => Ok(AuthProgress::Informational),
        }
    }
}
