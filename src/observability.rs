use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: wire queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "staydesk_queries_total";

/// Histogram: wire query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "staydesk_query_duration_seconds";

/// Counter: stay requests submitted. Labels: outcome.
pub const REQUESTS_TOTAL: &str = "staydesk_requests_total";

/// Counter: requests approved.
pub const APPROVALS_TOTAL: &str = "staydesk_approvals_total";

/// Counter: booking notice emails that could not be delivered.
pub const NOTIFICATION_FAILURES_TOTAL: &str = "staydesk_notification_failures_total";

/// Counter: stored rows with unusable data. Labels: stage (load, calendar).
pub const MALFORMED_RECORDS_TOTAL: &str = "staydesk_malformed_records_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staydesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staydesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staydesk_connections_rejected_total";

/// Counter: failed password checks and unknown users.
pub const AUTH_FAILURES_TOTAL: &str = "staydesk_auth_failures_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staydesk_wal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staydesk_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
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
        Command::SubmitRequest(_) => "submit_request",
        Command::Approve { .. } => "approve",
        Command::Reject { .. } => "reject",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::Block { .. } => "block",
        Command::Unblock { .. } => "unblock",
        Command::SelectCalendar => "select_calendar",
        Command::SelectCalendarFeed => "select_calendar_feed",
        Command::SelectBlocked => "select_blocked",
        Command::SelectRequests => "select_requests",
        Command::SelectBookings => "select_bookings",
    }
}
