use std::sync::Arc;

use request_perf_monitor::perf_log::PerfLogWriter;
use request_perf_monitor::{analysis, logging, server, AppState, MonitorConfig};

#[tokio::main]
async fn main() {
    logging::init();

    // ── 1. Configuration ─────────────────────────────────────────
    let config = MonitorConfig::from_env();
    tracing::info!(
        enabled = config.enabled,
        sample_rate = config.sample_rate,
        buffer_capacity = config.buffer_capacity,
        metrics_key_configured = config.api_key.is_some(),
        "performance monitoring configured"
    );
    if config.api_key.is_none() {
        tracing::warn!("PERF_METRICS_API_KEY is not set; /metrics/* will deny every request");
    }

    // ── 2. Persisted performance log ─────────────────────────────
    let perf_log = if config.enabled {
        let (sender, writer) = PerfLogWriter::new(config.analysis.log_path.clone());
        tokio::spawn(writer.run());
        Some(sender)
    } else {
        None
    };

    // ── 3. Shared state and background jobs ──────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, perf_log));
    let _jobs = analysis::scheduler::spawn_jobs(&state, analysis::http_client());

    // ── 4. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));

    tracing::info!(addr = %bind_addr, "listening");
    tracing::info!("summary → http://{bind_addr}/metrics/summary");
    tracing::info!("live    → http://{bind_addr}/metrics/live");

    server::serve(listener, state, shutdown_signal())
        .await
        .expect("server exited with error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
