//! Port Interfaces
//!
//! Defines the interfaces (ports) between the relay's application layer and
//! its infrastructure adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamControl`]: send subscribe/unsubscribe control frames to a
//!   vendor feed
//!
//! ## Driver Ports (Inbound)
//!
//! - [`ActiveKeySource`]: the snapshot an upstream connector replays after
//!   every successful open

use crate::domain::subscription::{ClientId, Feed, SubscriptionKey, SubscriptionRegistry};

/// Control surface of one upstream feed connection.
///
/// Implementations must not block: they enqueue a frame and return. Calls
/// arrive while the registry partition that decided them is still locked,
/// so an implementation must not touch that registry. When the transport is
/// not open the call is dropped, since the next open replays the full
/// active key set anyway.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamControl: Send + Sync {
    /// Subscribe to a batch of keys in one vendor frame.
    fn subscribe(&self, keys: &[SubscriptionKey]);

    /// Unsubscribe from a batch of keys in one vendor frame.
    fn unsubscribe(&self, keys: &[SubscriptionKey]);
}

/// Source of the keys currently held by at least one party.
pub trait ActiveKeySource: Send + Sync {
    /// Sorted snapshot of present keys in one feed partition.
    fn active_keys(&self, feed: Feed) -> Vec<SubscriptionKey>;
}

impl ActiveKeySource for SubscriptionRegistry<ClientId> {
    fn active_keys(&self, feed: Feed) -> Vec<SubscriptionKey> {
        Self::active_keys(self, feed)
    }
}
