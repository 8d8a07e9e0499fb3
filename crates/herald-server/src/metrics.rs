//! Metrics collection and export for Herald.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use herald_core::{ChannelKind, IngestSource};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "herald_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "herald_connections_active";
    pub const MESSAGES_TOTAL: &str = "herald_messages_total";
    pub const MESSAGES_BYTES: &str = "herald_messages_bytes";
    pub const CHANNELS_ACTIVE: &str = "herald_channels_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "herald_subscriptions_total";
    pub const SUBSCRIPTION_ERRORS_TOTAL: &str = "herald_subscription_errors_total";
    pub const BROADCASTS_TOTAL: &str = "herald_broadcasts_total";
    pub const CLIENT_EVENTS_TOTAL: &str = "herald_client_events_total";
    pub const PRESENCE_LEAVES_TOTAL: &str = "herald_presence_leaves_total";
    pub const LATENCY_SECONDS: &str = "herald_latency_seconds";
    pub const ERRORS_TOTAL: &str = "herald_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of socket messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of socket messages");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of occupied channels");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of successful channel joins"
    );
    metrics::describe_counter!(
        names::SUBSCRIPTION_ERRORS_TOTAL,
        "Total number of rejected channel joins"
    );
    metrics::describe_counter!(
        names::BROADCASTS_TOTAL,
        "Total number of application events accepted for broadcast"
    );
    metrics::describe_counter!(
        names::CLIENT_EVENTS_TOTAL,
        "Total number of relayed client events"
    );
    metrics::describe_counter!(
        names::PRESENCE_LEAVES_TOTAL,
        "Total number of presence channel leaves"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a socket message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

fn kind_label(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Public => "public",
        ChannelKind::Private => "private",
        ChannelKind::Presence => "presence",
    }
}

/// Record a successful join.
pub fn record_subscription(kind: ChannelKind) {
    counter!(names::SUBSCRIPTIONS_TOTAL, "kind" => kind_label(kind)).increment(1);
}

/// Record a rejected join.
pub fn record_subscription_error(code: u16) {
    counter!(names::SUBSCRIPTION_ERRORS_TOTAL, "code" => code.to_string()).increment(1);
}

/// Record an accepted application event.
pub fn record_broadcast(source: IngestSource) {
    counter!(names::BROADCASTS_TOTAL, "source" => source.as_str()).increment(1);
}

/// Record a relayed client event.
pub fn record_client_event() {
    counter!(names::CLIENT_EVENTS_TOTAL).increment(1);
}

/// Record a presence channel leave.
pub fn record_presence_leave() {
    counter!(names::PRESENCE_LEAVES_TOTAL).increment(1);
}

/// Update occupied channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
