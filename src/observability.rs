use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tablebook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tablebook_query_duration_seconds";

/// Counter: availability lookups, including those made while booking.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "tablebook_availability_checks_total";

pub const RESERVATIONS_CREATED_TOTAL: &str = "tablebook_reservations_created_total";
pub const RESERVATIONS_UPDATED_TOTAL: &str = "tablebook_reservations_updated_total";
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "tablebook_reservations_cancelled_total";

/// Counter: events handed to the notify hub. Labels: kind.
pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "tablebook_notifications_published_total";

pub const MAIL_SENT_TOTAL: &str = "tablebook_mail_sent_total";
pub const MAIL_FAILED_TOTAL: &str = "tablebook_mail_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tablebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tablebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tablebook_connections_rejected_total";

/// Gauge: restaurants held in memory.
pub const RESTAURANTS_ACTIVE: &str = "tablebook_restaurants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tablebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tablebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRestaurant(_) => "insert_restaurant",
        Command::UpdateRestaurant { .. } => "update_restaurant",
        Command::SelectRestaurants { .. } => "select_restaurants",
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::MarkViewed { .. } => "mark_viewed",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectRestaurantReservations { .. } => "select_restaurant_reservations",
        Command::SelectDinerReservations => "select_diner_reservations",
        Command::SelectUnviewed { .. } => "select_unviewed",
        Command::Set { .. } => "set",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
