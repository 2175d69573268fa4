use std::io;
use std::net::SocketAddr;

use crate::api::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "motorpool_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "motorpool_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "motorpool_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "motorpool_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "motorpool_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "motorpool_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "motorpool_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservations committed. Labels: status (pending/approved).
pub const RESERVATIONS_CREATED_TOTAL: &str = "motorpool_reservations_created_total";

/// Counter: writes rejected because they overlap an open claim.
pub const CONFLICTS_TOTAL: &str = "motorpool_conflicts_total";

/// Counter: instants where a car had more than one open claim.
pub const CONSISTENCY_WARNINGS_TOTAL: &str = "motorpool_consistency_warnings_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| io::Error::other(format!("failed to install Prometheus exporter: {e}")))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Request variant to a short label for metrics.
pub fn command_label(req: &Request) -> &'static str {
    match req {
        Request::ListCars => "list_cars",
        Request::FleetStatus { .. } => "fleet_status",
        Request::CarStatus { .. } => "car_status",
        Request::CarReservations { .. } => "car_reservations",
        Request::History { .. } => "history",
        Request::GetReservation { .. } => "get_reservation",
        Request::CreateReservation(_) => "create_reservation",
        Request::ApproveReservation { .. } => "approve_reservation",
        Request::StartTrip(_) => "start_trip",
        Request::CompleteTrip(_) => "complete_trip",
        Request::ExtendReservation(_) => "extend_reservation",
    }
}
