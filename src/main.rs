//! Live Metrics Agent - pings a collection service and streams telemetry
//! while someone is watching.
//!
//! ## Features
//!
//! - Ping / post coordination loop on a tokio task
//! - Endpoint redirects with validity windows
//! - Error backoff without ever exiting on its own
//! - Graceful shutdown on Ctrl+C
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `LIVE_METRICS_ENDPOINT`: collection service URL (default: http://localhost:8000)
//! - `LIVE_METRICS_INSTANCE`: instance name (default: live-metrics-agent)
//! - `LIVE_METRICS_PING_INTERVAL_MS`: wait between pings (default: 5000)
//! - `LIVE_METRICS_POST_INTERVAL_MS`: wait between posts (default: 1000)
//! - `LIVE_METRICS_ERROR_INTERVAL_MS`: wait after failures (default: 40000)
//! - `LIVE_METRICS_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 5)
//! - `LIVE_METRICS_BUFFER_CAPACITY`: items kept between posts (default: 10000)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use live_metrics_agent::buffer::{BufferConfig, BufferSender, TelemetryBuffer};
use live_metrics_agent::client::LiveMetricsClient;
use live_metrics_agent::config::Config;
use live_metrics_agent::coordinator::Coordinator;
use live_metrics_agent::telemetry::TelemetryItem;

/// Interval between heartbeat metrics recorded by the agent itself
const HEARTBEAT_INTERVAL_SECS: u64 = 1;

/// Upper bound on waiting for the coordinator to exit after Ctrl+C
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting live metrics agent...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                endpoint = %config.endpoint,
                instance = %config.instance,
                ping_interval_ms = config.intervals.ping_interval.as_millis() as u64,
                post_interval_ms = config.intervals.post_interval.as_millis() as u64,
                error_interval_ms = config.intervals.error_interval.as_millis() as u64,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let buffer_config = BufferConfig::new(config.buffer_capacity, config.instance.clone());
    let (recorder, buffer, outbox) = TelemetryBuffer::new(buffer_config);
    let buffer = Arc::new(buffer);

    let client = match LiveMetricsClient::new(&config, outbox) {
        Ok(client) => {
            info!(endpoint = %client.endpoint(), "HTTP client initialized");
            Arc::new(client)
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let coordinator = match Coordinator::new(
        config.intervals,
        client.clone(),
        buffer.clone(),
        client.clone(),
    ) {
        Ok(coordinator) => Arc::new(coordinator),
        Err(e) => {
            error!(error = %e, "Failed to create coordinator");
            std::process::exit(1);
        }
    };

    let coordinator_handle = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.run().await }
    });

    let heartbeat_handle = tokio::spawn(async move {
        run_heartbeat(recorder).await;
    });

    info!("Live metrics agent running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping...");
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    }

    coordinator.stop();
    heartbeat_handle.abort();

    // The loop exits once its in-flight call, if any, returns.
    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    match tokio::time::timeout(shutdown_timeout, coordinator_handle).await {
        Ok(Ok(stats)) => {
            info!(
                pings = stats.pings,
                posts = stats.posts,
                failures = stats.failures,
                activations = stats.activations,
                "Coordinator shut down gracefully"
            );
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Coordinator task panicked during shutdown");
        }
        Err(_) => {
            warn!("Coordinator shutdown timed out after {:?}", shutdown_timeout);
        }
    }

    let client_stats = client.stats();
    let buffer_stats = buffer.stats();
    info!(
        batches_sent = client_stats.batches_sent,
        items_sent = client_stats.items_sent,
        failed_requests = client_stats.failed_requests,
        items_dropped = buffer_stats.items_dropped,
        "Live metrics agent stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Record a heartbeat metric carrying the agent's uptime.
///
/// Runs until the buffer is dropped.
async fn run_heartbeat(recorder: BufferSender) {
    let mut ticker = interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    let started = Instant::now();

    loop {
        ticker.tick().await;

        let item = TelemetryItem::metric("agent.uptime_seconds", started.elapsed().as_secs_f64())
            .with_property("agent_version", env!("CARGO_PKG_VERSION"));

        if recorder.send(item).await.is_err() {
            info!("Telemetry buffer closed, heartbeat stopping");
            break;
        }
    }
}
