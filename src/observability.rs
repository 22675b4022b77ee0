use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "keyturn_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "keyturn_query_duration_seconds";

/// Counter: reservations refused because the slot was not available.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "keyturn_reservation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "keyturn_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "keyturn_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "keyturn_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "keyturn_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "keyturn_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "keyturn_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertTemplate { .. } => "insert_template",
        Command::DeleteTemplate { .. } => "delete_template",
        Command::InsertException { .. } => "insert_exception",
        Command::DeleteException { .. } => "delete_exception",
        Command::InsertHoliday { .. } => "insert_holiday",
        Command::DeleteHoliday { .. } => "delete_holiday",
        Command::InsertBooking { .. } => "reserve",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::UpdateBookingPayment { .. } => "update_booking_payment",
        Command::UpdateBookingGameMaster { .. } => "assign_game_master",
        Command::InsertReview { .. } => "submit_review",
        Command::SetUtcOffset { .. } => "set_utc_offset",
        Command::SelectRooms => "select_rooms",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlotCheck { .. } => "slot_check",
        Command::SelectQuote { .. } => "quote",
        Command::SelectStats { .. } => "stats",
        Command::SelectRecommendations { .. } => "recommendations",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
    }
}
