//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metric is recorded; a second install
/// fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connections currently registered (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Change events handed to the bus (counter, labels: event).
pub const RELAY_EVENTS_PUBLISHED_TOTAL: &str = "relay_events_published_total";
/// Failed publishes (counter, labels: event).
pub const RELAY_PUBLISH_ERRORS_TOTAL: &str = "relay_publish_errors_total";
/// Events written to a client socket (counter).
pub const RELAY_EVENTS_DELIVERED_TOTAL: &str = "relay_events_delivered_total";
/// Events a connection never received (counter, labels: cause).
pub const RELAY_DELIVERY_DROPS_TOTAL: &str = "relay_delivery_drops_total";
/// Subscriptions that could not be opened (counter).
pub const RELAY_SUBSCRIPTION_ERRORS_TOTAL: &str = "relay_subscription_errors_total";
/// Keep-alive pings queued (counter).
pub const RELAY_PINGS_SENT_TOTAL: &str = "relay_pings_sent_total";
