use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "innkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "innkeep_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Counter: unit lock acquisitions that timed out.
pub const LOCK_TIMEOUTS_TOTAL: &str = "innkeep_lock_timeouts_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: reservation attempts rejected because the unit was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "innkeep_booking_conflicts_total";

/// Counter: reservations committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "innkeep_reservations_created_total";

/// Counter: offers expired by the sweep.
pub const OFFERS_EXPIRED_TOTAL: &str = "innkeep_offers_expired_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::InsertUnit { .. } => "insert_unit",
        Command::SetPrice { .. } => "set_price",
        Command::LockUnit { .. } => "lock_unit",
        Command::UnlockUnit { .. } => "unlock_unit",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::ConfirmReservation { .. } => "confirm_reservation",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::AdvanceHousekeeping { .. } => "advance_housekeeping",
        Command::ForceClean { .. } => "force_clean",
        Command::InsertTask { .. } => "insert_task",
        Command::StartTask { .. } => "start_task",
        Command::CompleteTask { .. } => "complete_task",
        Command::InsertOffer { .. } => "insert_offer",
        Command::ApplyOffer { .. } => "apply_offer",
        Command::RevertOffer { .. } => "revert_offer",
        Command::SweepOffers { .. } => "sweep_offers",
        Command::InsertRateModifier { .. } => "insert_rate_modifier",
        Command::DeleteRateModifier { .. } => "delete_rate_modifier",
        Command::InsertInvoice { .. } => "insert_invoice",
        Command::IssueInvoice { .. } => "issue_invoice",
        Command::RecordPayment { .. } => "record_payment",
        Command::CancelInvoice { .. } => "cancel_invoice",
        Command::SelectUnits { .. } => "select_units",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectInvoices { .. } => "select_invoices",
        Command::SelectInvoiceLines { .. } => "select_invoice_lines",
        Command::SelectTasks { .. } => "select_tasks",
        Command::SelectHousekeepingLog { .. } => "select_housekeeping_log",
        Command::SelectOffers { .. } => "select_offers",
        Command::SelectRateModifiers => "select_rate_modifiers",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
