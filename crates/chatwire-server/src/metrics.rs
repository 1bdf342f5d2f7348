//! Metrics export for chatwire.
//!
//! The core records through the `metrics` facade; this module describes
//! those metrics, installs the Prometheus exporter and tracks connections.

use chatwire_core::telemetry::names;
use chatwire_core::Disconnect;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Connections closed, labelled by reason.
pub const DISCONNECTS_TOTAL: &str = "chatwire_disconnects_total";

/// Rejected upgrade attempts, labelled by reason.
pub const AUTH_FAILURES_TOTAL: &str = "chatwire_auth_failures_total";

/// Describe every metric.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(
        names::QUEUE_OVERFLOWS_TOTAL,
        "Clients disconnected because their outbound queue was full"
    );
    metrics::describe_counter!(
        names::PUBLISH_FAILURES_TOTAL,
        "Payloads lost because the fabric rejected a publish"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
    metrics::describe_counter!(DISCONNECTS_TOTAL, "Connections closed, by reason");
    metrics::describe_counter!(AUTH_FAILURES_TOTAL, "Rejected connection attempts");

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

/// Record a rejected upgrade.
pub fn record_auth_failure(reason: &'static str) {
    counter!(AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard {
    reason: Option<Disconnect>,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self { reason: None }
    }

    /// Remember why the connection ended.
    pub fn set_reason(&mut self, reason: Disconnect) {
        self.reason = Some(reason);
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
        let reason = self.reason.map_or("aborted", |r| r.as_str());
        counter!(DISCONNECTS_TOTAL, "reason" => reason).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; recording must still be safe.
        let mut guard = ConnectionMetricsGuard::new();
        guard.set_reason(Disconnect::PeerClosed);
        drop(guard);
        let _unfinished = ConnectionMetricsGuard::default();
    }
}
