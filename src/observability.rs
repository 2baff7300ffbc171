use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotbook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotbook_request_duration_seconds";

/// Counter: creates rejected because the slot key was taken.
pub const CONFLICTS_TOTAL: &str = "slotbook_conflicts_total";

/// Counter: login attempts refused. Labels: reason.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Counter: upstream roster pushes processed. Labels: kind, outcome.
pub const ROSTER_SYNC_TOTAL: &str = "slotbook_roster_sync_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: reservations currently in the store.
pub const RESERVATIONS_ACTIVE: &str = "slotbook_reservations_active";

/// Gauge: unresolved incidents.
pub const INCIDENTS_ACTIVE: &str = "slotbook_incidents_active";

/// Gauge: connected live-channel subscribers.
pub const LIVE_SUBSCRIBERS: &str = "slotbook_live_subscribers";

/// Counter: live subscribers resynchronized after falling behind.
pub const LIVE_LAGGED_TOTAL: &str = "slotbook_live_lagged_total";

/// Histogram: snapshot file write duration in seconds.
pub const SNAPSHOT_WRITE_DURATION_SECONDS: &str = "slotbook_snapshot_write_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
