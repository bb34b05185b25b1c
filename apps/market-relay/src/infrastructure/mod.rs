//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Vendor WebSocket connectors (equities and options clusters).
pub mod upstream;

/// Downstream relay WebSocket server.
pub mod relay;

/// Client-side connection manager for the relay.
pub mod client;

/// Broadcast channel adapters for client-side update fan-out.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
