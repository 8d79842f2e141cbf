use std::io;
use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "parkbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "parkbook_query_duration_seconds";

/// Counter: create/update refused because the spot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "parkbook_booking_conflicts_total";

/// Counter: bookings stored.
pub const BOOKINGS_CREATED_TOTAL: &str = "parkbook_bookings_created_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkbook_connections_rejected_total";

/// Gauge: number of loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "parkbook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(io::Error::other)?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertLocation { .. } => "insert_location",
        Command::UpdateLocation { .. } => "update_location",
        Command::DeleteLocation { .. } => "delete_location",
        Command::InsertSpot { .. } => "insert_spot",
        Command::DeleteSpot { .. } => "delete_spot",
        Command::InsertPricingException { .. } => "insert_pricing_exception",
        Command::DeletePricingException { .. } => "delete_pricing_exception",
        Command::InsertBooking(_) => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectPreview(_) => "select_preview",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectPaymentHistory { .. } => "select_payment_history",
        Command::SelectLocations => "select_locations",
        Command::SelectPricingExceptions { .. } => "select_pricing_exceptions",
    }
}
