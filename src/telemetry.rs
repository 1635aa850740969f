// src/telemetry.rs

//! Metric registration and the `/metrics` HTTP endpoint.
//!
//! Metric objects are process-wide: the prometheus recorder is installed
//! once at startup and every module records through the `metrics` macros
//! with labels supplied at use.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

/// Preferred metrics port, tried first when `--port 0`.
pub const DEFAULT_PORT: u16 = 5365;

// Worker lifecycle.
pub const WATCHERS_STARTED: &str = "vigil_watchers_started";
pub const ANALYSERS_STARTED: &str = "vigil_analysers_started";
pub const TRIGGERS_STARTED: &str = "vigil_triggers_started";

// Command runs, one set per worker kind; labelled by node and status.
pub const WATCH_COMMANDS: &str = "vigil_watch_commands";
pub const WATCH_COMMANDS_FINISHED: &str = "vigil_watch_commands_finished";
pub const WATCH_COMMAND_LATENCY: &str = "vigil_watch_command_latency_seconds";
pub const ANALYSE_COMMANDS: &str = "vigil_analyse_commands";
pub const ANALYSE_COMMANDS_FINISHED: &str = "vigil_analyse_commands_finished";
pub const ANALYSE_COMMAND_LATENCY: &str = "vigil_analyse_command_latency_seconds";
pub const TRIGGER_COMMANDS: &str = "vigil_trigger_commands";
pub const TRIGGER_COMMANDS_FINISHED: &str = "vigil_trigger_commands_finished";
pub const TRIGGER_COMMAND_LATENCY: &str = "vigil_trigger_command_latency_seconds";

// Store traffic.
pub const SQL_QUERIES: &str = "vigil_sql_queries";
pub const SQL_QUERIES_FINISHED: &str = "vigil_sql_queries_finished";
pub const SQL_QUERY_LATENCY: &str = "vigil_sql_query_latency_seconds";
pub const EXECUTION_DATA_BYTES: &str = "vigil_execution_data_bytes";

// Scheduling and notifications.
pub const WATCH_NEXT_RUN: &str = "vigil_watch_next_run";
pub const NODE_DATA_STORED: &str = "vigil_node_data_stored";
pub const NODE_STORED_HINTS_SENT: &str = "vigil_node_stored_hints_sent";
pub const NODE_STORED_HINTS_DROPPED: &str = "vigil_node_stored_hints_dropped";
pub const NODE_STORED_HINTS_RECEIVED: &str = "vigil_node_stored_hints_received";

/// Install the process-wide prometheus recorder and describe every metric.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus metrics recorder")?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(WATCHERS_STARTED, "Watchers that have been started");
    describe_counter!(ANALYSERS_STARTED, "Analysers that have been started");
    describe_counter!(TRIGGERS_STARTED, "Trigger workers that have been started");

    describe_counter!(WATCH_COMMANDS, "Number of watch commands run");
    describe_counter!(
        WATCH_COMMANDS_FINISHED,
        "Number of watch commands finished (by status)"
    );
    describe_histogram!(WATCH_COMMAND_LATENCY, "Latency of watch commands");
    describe_counter!(ANALYSE_COMMANDS, "Number of analyse commands run");
    describe_counter!(
        ANALYSE_COMMANDS_FINISHED,
        "Number of analyse commands finished (by status)"
    );
    describe_histogram!(ANALYSE_COMMAND_LATENCY, "Latency of analyse commands");
    describe_counter!(TRIGGER_COMMANDS, "Number of trigger commands run");
    describe_counter!(
        TRIGGER_COMMANDS_FINISHED,
        "Number of trigger commands finished (by status)"
    );
    describe_histogram!(TRIGGER_COMMAND_LATENCY, "Latency of trigger commands");

    describe_counter!(SQL_QUERIES, "Number of SQL queries");
    describe_counter!(
        SQL_QUERIES_FINISHED,
        "Number of SQL queries finished (by status)"
    );
    describe_histogram!(SQL_QUERY_LATENCY, "Latency of SQL queries");
    describe_counter!(
        EXECUTION_DATA_BYTES,
        "Bytes of execution data inserted into the store"
    );

    describe_gauge!(
        WATCH_NEXT_RUN,
        "Timestamp (Unix seconds) of the next scheduled run"
    );
    describe_counter!(
        NODE_DATA_STORED,
        "Number of times data for a node was inserted into the store"
    );
    describe_counter!(
        NODE_STORED_HINTS_SENT,
        "Number of 'node stored' hints delivered to worker channels"
    );
    describe_counter!(
        NODE_STORED_HINTS_DROPPED,
        "Number of 'node stored' hints dropped because a channel was full"
    );
    describe_counter!(
        NODE_STORED_HINTS_RECEIVED,
        "Number of 'node stored' hints received by workers"
    );
}

/// Bind the metrics listener. A non-zero `port` is bound exactly; port 0
/// tries [`DEFAULT_PORT`] first and falls back to an ephemeral port.
pub async fn bind_listener(listen_host: &str, port: u16) -> Result<TcpListener> {
    let host = if listen_host == "localhost" {
        "127.0.0.1"
    } else {
        listen_host
    };

    if port != 0 {
        return TcpListener::bind((host, port))
            .await
            .with_context(|| format!("binding {host}:{port}"));
    }

    if let Ok(listener) = TcpListener::bind((host, DEFAULT_PORT)).await {
        return Ok(listener);
    }
    TcpListener::bind((host, 0))
        .await
        .with_context(|| format!("binding {host} on an ephemeral port"))
}

/// Serve `/metrics` forever. Returning at all is an error.
pub async fn serve(listener: TcpListener, handle: PrometheusHandle) -> Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || std::future::ready(handle.render())),
    );

    axum::serve(listener, app)
        .await
        .context("serving metrics endpoint")?;
    anyhow::bail!("metrics endpoint stopped serving")
}
