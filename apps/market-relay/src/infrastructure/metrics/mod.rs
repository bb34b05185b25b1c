//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames and ticks received per feed, reconnects, vendor errors
//! - **Downstream**: connected clients, ticks delivered, frames skipped for
//!   closed clients, clients evicted for a full queue, malformed client frames
//! - **Subscriptions**: active upstream keys per feed
//! - **Latency**: tick fan-out duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::subscription::Feed;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream
    describe_counter!(
        "relay_upstream_frames_received_total",
        "Total text frames received from vendor feeds"
    );
    describe_counter!(
        "relay_upstream_ticks_total",
        "Total ticks decoded from vendor feeds"
    );
    describe_counter!(
        "relay_upstream_errors_total",
        "Total vendor feed errors by type"
    );
    describe_counter!(
        "relay_reconnects_total",
        "Total vendor WebSocket reconnection attempts"
    );
    describe_gauge!(
        "relay_upstream_connected",
        "Whether the vendor feed transport is open (1) or not (0)"
    );

    // Downstream
    describe_gauge!("relay_clients", "Number of connected relay clients");
    describe_counter!(
        "relay_ticks_delivered_total",
        "Total quote/option_update frames enqueued to clients"
    );
    describe_counter!(
        "relay_frames_skipped_total",
        "Total frames not delivered because the client queue was closed"
    );
    describe_counter!(
        "relay_clients_evicted_total",
        "Total clients disconnected because their outbound queue was full"
    );
    describe_counter!(
        "relay_client_frames_rejected_total",
        "Total malformed client control frames"
    );

    // Subscriptions
    describe_gauge!(
        "relay_active_keys",
        "Keys currently subscribed upstream per feed"
    );

    // Latency
    describe_histogram!(
        "relay_fanout_seconds",
        "Time to fan one tick out to interested clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a text frame received from a vendor feed.
pub fn record_upstream_frame(feed: Feed) {
    counter!("relay_upstream_frames_received_total", "feed" => feed.as_str()).increment(1);
}

/// Record a tick decoded from a vendor feed.
pub fn record_upstream_tick(feed: Feed) {
    counter!("relay_upstream_ticks_total", "feed" => feed.as_str()).increment(1);
}

/// Record a vendor feed error.
pub fn record_upstream_error(feed: Feed, error_type: &str) {
    counter!(
        "relay_upstream_errors_total",
        "feed" => feed.as_str(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a vendor reconnection attempt.
pub fn record_reconnect(feed: Feed) {
    counter!("relay_reconnects_total", "feed" => feed.as_str()).increment(1);
}

/// Update whether a vendor feed transport is open.
pub fn set_upstream_connected(feed: Feed, connected: bool) {
    gauge!("relay_upstream_connected", "feed" => feed.as_str()).set(if connected {
        1.0
    } else {
        0.0
    });
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("relay_clients").set(count as f64);
}

/// Record frames delivered and skipped for one tick.
pub fn record_delivery(feed: Feed, delivered: usize, skipped: usize) {
    counter!("relay_ticks_delivered_total", "feed" => feed.as_str()).increment(delivered as u64);
    if skipped > 0 {
        counter!("relay_frames_skipped_total", "feed" => feed.as_str()).increment(skipped as u64);
    }
}

/// Record clients evicted for a full outbound queue.
pub fn record_evictions(count: usize) {
    counter!("relay_clients_evicted_total").increment(count as u64);
}

/// Record a rejected client control frame.
pub fn record_client_frame_rejected(reason: &'static str) {
    counter!("relay_client_frames_rejected_total", "reason" => reason).increment(1);
}

/// Update the active upstream key count for a feed.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_keys(feed: Feed, count: usize) {
    gauge!("relay_active_keys", "feed" => feed.as_str()).set(count as f64);
}

/// Record tick fan-out duration.
pub fn record_fanout_duration(feed: Feed, duration: Duration) {
    histogram!("relay_fanout_seconds", "feed" => feed.as_str()).record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
