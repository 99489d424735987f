//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Feed**: ticks applied to the price cache, frames dropped on decode
//! - **Broker**: messages received, fan-out deliveries and drops
//! - **Links**: reconnects and current state per upstream link
//! - **Sessions**: active client sessions and evictions
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{LinkKind, LinkState};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first call.
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
    describe_counter!(
        "market_relay_ticks_applied_total",
        "Price ticks written into the price cache"
    );
    describe_counter!(
        "market_relay_feed_frames_dropped_total",
        "Feed frames or records dropped because they could not be decoded"
    );
    describe_counter!(
        "market_relay_broker_messages_total",
        "Messages received from the broker subscription"
    );
    describe_counter!(
        "market_relay_broadcast_deliveries_total",
        "Broker messages queued to client sessions"
    );
    describe_counter!(
        "market_relay_broadcast_drops_total",
        "Broadcast sends that failed and evicted the session"
    );
    describe_counter!(
        "market_relay_reconnects_total",
        "Upstream reconnection attempts by link"
    );
    describe_counter!(
        "market_relay_sessions_evicted_total",
        "Client sessions removed after a failed send"
    );

    describe_gauge!(
        "market_relay_client_sessions",
        "Number of registered client WebSocket sessions"
    );
    describe_gauge!(
        "market_relay_link_state",
        "Upstream link state (0 connecting, 1 streaming, 2 backoff, 3 stopped)"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record ticks written into the price cache.
pub fn record_ticks_applied(count: u64) {
    counter!("market_relay_ticks_applied_total").increment(count);
}

/// Record dropped feed frames or records.
pub fn record_frames_dropped(reason: &'static str, count: u64) {
    counter!(
        "market_relay_feed_frames_dropped_total",
        "reason" => reason
    )
    .increment(count);
}

/// Record a message received from the broker.
pub fn record_broker_message() {
    counter!("market_relay_broker_messages_total").increment(1);
}

/// Record the outcome of one broadcast.
pub fn record_broadcast(delivered: u64, dropped: u64) {
    counter!("market_relay_broadcast_deliveries_total").increment(delivered);
    if dropped > 0 {
        counter!("market_relay_broadcast_drops_total").increment(dropped);
        counter!("market_relay_sessions_evicted_total").increment(dropped);
    }
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect(link: LinkKind) {
    counter!(
        "market_relay_reconnects_total",
        "link" => link.as_str()
    )
    .increment(1);
}

/// Update the current state of an upstream link.
pub fn set_link_state(link: LinkKind, state: LinkState) {
    let value = match state {
        LinkState::Connecting => 0.0,
        LinkState::Streaming => 1.0,
        LinkState::Backoff => 2.0,
        LinkState::Stopped => 3.0,
    };
    gauge!(
        "market_relay_link_state",
        "link" => link.as_str()
    )
    .set(value);
}

/// Update the registered client session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_client_sessions(count: usize) {
    gauge!("market_relay_client_sessions").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_ticks_applied(3);
        record_frames_dropped("frame", 1);
        record_broker_message();
        record_broadcast(2, 1);
        record_reconnect(LinkKind::Feed);
        set_link_state(LinkKind::Broker, LinkState::Streaming);
        set_client_sessions(4);
    }

    #[test]
    fn local_recorder_renders_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_reconnect(LinkKind::Feed);
            record_ticks_applied(2);
        });

        let rendered = handle.render();
        assert!(rendered.contains("market_relay_reconnects_total{link=\"feed\"} 1"));
        assert!(rendered.contains("market_relay_ticks_applied_total 2"));
    }
}
