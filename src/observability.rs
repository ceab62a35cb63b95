use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "ppdb_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "ppdb_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: writes rejected because a child interval leaves its parent. Labels: level.
pub const CONTAINMENT_VIOLATIONS_TOTAL: &str = "ppdb_containment_violations_total";

/// Counter: writes rejected by a uniqueness rule. Labels: entity.
pub const CONFLICTS_TOTAL: &str = "ppdb_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "ppdb_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "ppdb_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "ppdb_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "ppdb_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "ppdb_wal_flush_batch_size";

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
        Command::InsertPeriod { .. } => "insert_period",
        Command::UpdatePeriod { .. } => "update_period",
        Command::DeletePeriod { .. } => "delete_period",
        Command::SelectPeriods { .. } => "select_periods",
        Command::SelectPeriod { .. } => "select_period",
        Command::InsertLane { .. } => "insert_lane",
        Command::UpdateLane { .. } => "update_lane",
        Command::DeleteLane { .. } => "delete_lane",
        Command::SelectLanes => "select_lanes",
        Command::SelectLane { .. } => "select_lane",
        Command::InsertStage { .. } => "insert_stage",
        Command::UpdateStage { .. } => "update_stage",
        Command::DeleteStage { .. } => "delete_stage",
        Command::SelectStages => "select_stages",
        Command::SelectStage { .. } => "select_stage",
        Command::InsertPeriodLane { .. } => "insert_period_lane",
        Command::UpdatePeriodLane { .. } => "update_period_lane",
        Command::DeletePeriodLane { .. } => "delete_period_lane",
        Command::SelectPeriodLanes { .. } => "select_period_lanes",
        Command::SelectPeriodLane { .. } => "select_period_lane",
        Command::InsertSchedule { .. } => "insert_schedule",
        Command::UpdateSchedule { .. } => "update_schedule",
        Command::SetScheduleClosed { .. } => "set_schedule_closed",
        Command::DeleteSchedule { .. } => "delete_schedule",
        Command::SelectSchedules { .. } => "select_schedules",
        Command::SelectSchedule { .. } => "select_schedule",
    }
}
