use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: tickets routed by the dispatch policy.
pub const TICKETS_DISPATCHED_TOTAL: &str = "clinicq_tickets_dispatched_total";

/// Counter: tickets whose status mutation completed.
pub const TICKETS_PROCESSED_TOTAL: &str = "clinicq_tickets_processed_total";

/// Counter: tickets dropped because the status-mutation collaborator failed.
pub const MUTATION_FAILURES_TOTAL: &str = "clinicq_mutation_failures_total";

/// Counter: long-poll listeners resolved by a snapshot push.
pub const NOTIFICATIONS_TOTAL: &str = "clinicq_notifications_total";

/// Histogram: time spent processing one ticket (busy-flag hold time), seconds.
pub const TICKET_PROCESS_DURATION_SECONDS: &str = "clinicq_ticket_process_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: tickets currently waiting across all rooms.
pub const TICKETS_WAITING: &str = "clinicq_tickets_waiting";

/// Gauge: rooms currently marked busy.
pub const ROOMS_BUSY: &str = "clinicq_rooms_busy";

/// Gauge: long-poll listeners currently suspended.
pub const LISTENERS_ACTIVE: &str = "clinicq_listeners_active";

/// Gauge: room workers currently running.
pub const WORKERS_RUNNING: &str = "clinicq_workers_running";

/// Gauge: number of active tenants (running dispatchers).
pub const TENANTS_ACTIVE: &str = "clinicq_tenants_active";

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
