use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: boundary requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "handoff_requests_total";

/// Histogram: boundary request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "handoff_request_duration_seconds";

/// Counter: bookings admitted.
pub const BOOKINGS_CREATED_TOTAL: &str = "handoff_bookings_created_total";

/// Counter: booking requests rejected. Labels: reason (the error code).
pub const BOOKINGS_REJECTED_TOTAL: &str = "handoff_bookings_rejected_total";

/// Counter: booking status transitions applied. Labels: status.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "handoff_booking_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "handoff_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "handoff_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
