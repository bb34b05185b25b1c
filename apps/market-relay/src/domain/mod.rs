//! Domain Layer - Core market data types and subscription bookkeeping.
//!
//! This layer contains the core domain types for market data fan-out
//! with no I/O. Everything here is synchronous and lock-scoped.

/// Tick types and the last-price cache.
pub mod streaming;

/// Reference-counted subscription tracking.
pub mod subscription;
