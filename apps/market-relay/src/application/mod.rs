//! Application Layer - Use cases, wire protocol and port definitions.
//!
//! This layer contains the relay service and the port interfaces that
//! define how the domain interacts with upstream feeds.

/// Port interfaces for upstream feed control.
pub mod ports;

/// Downstream JSON protocol.
pub mod protocol;

/// Relay service: control-frame handling and tick fan-out.
pub mod services;
