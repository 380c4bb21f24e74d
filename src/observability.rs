use std::net::SocketAddr;

// ── Admission and lifecycle ─────────────────────────────────────

/// Counter: reservations admitted. Labels: mode.
pub const RESERVATIONS_CREATED_TOTAL: &str = "fleetbook_reservations_created_total";

/// Counter: create/update requests refused for overlap.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "fleetbook_reservation_conflicts_total";

/// Counter: reservations moved to completed by the sweeper.
pub const RESERVATIONS_SWEPT_TOTAL: &str = "fleetbook_reservations_swept_total";

// ── Side effects ────────────────────────────────────────────────

/// Counter: dispatch results. Labels: outcome (sent, send_failed, pending).
pub const DISPATCH_OUTCOMES_TOTAL: &str = "fleetbook_dispatch_outcomes_total";

/// Histogram: time spent in the mailer, including deliveries that outlive the budget.
pub const EMAIL_DELIVERY_SECONDS: &str = "fleetbook_email_delivery_seconds";

/// Counter: payment attempts. Labels: status (captured, failed).
pub const PAYMENTS_TOTAL: &str = "fleetbook_payments_total";

/// Counter: characters newly inserted by an import run.
pub const CHARACTERS_IMPORTED_TOTAL: &str = "fleetbook_characters_imported_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "fleetbook_journal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "fleetbook_journal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
