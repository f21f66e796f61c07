use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "venuedb_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "venuedb_query_duration_seconds";

/// Counter: orders committed.
pub const ORDERS_PLACED_TOTAL: &str = "venuedb_orders_placed_total";

/// Counter: order attempts rejected. Labels: stage, kind.
pub const ORDER_REJECTIONS_TOTAL: &str = "venuedb_order_rejections_total";

/// Histogram: venues excluded by the availability resolver per dated listing.
pub const EXCLUDED_VENUES: &str = "venuedb_excluded_venues";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "venuedb_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "venuedb_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "venuedb_connections_rejected_total";

/// Counter: SQL-level login and access-token failures. Labels: stage.
pub const AUTH_FAILURES_TOTAL: &str = "venuedb_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "venuedb_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "venuedb_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectCities => "select_cities",
        Command::SelectVenues { .. } => "select_venues",
        Command::SelectVenue { .. } => "select_venue",
        Command::SelectPackage { .. } => "select_package",
        Command::SelectNearby => "select_nearby",
        Command::Login { .. } => "login",
        Command::InsertUser { .. } => "insert_user",
        Command::InsertOrder { .. } => "insert_order",
        Command::InsertCity(_) => "insert_city",
        Command::InsertVenue(_) => "insert_venue",
        Command::InsertCategory(_) => "insert_category",
        Command::InsertPackage(_) => "insert_package",
        Command::InsertGalleryImage(_) => "insert_gallery_image",
    }
}
