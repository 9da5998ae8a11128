//! Blast Campaign Execution Core development monolith.
//!
//! All-in-one binary for local development and small deployments:
//! - SQLite-backed campaign/queue/cache stores
//! - The campaign `Orchestrator` (runner + pacing + health + emergency
//!   monitor)
//! - Control-plane HTTP API
//! - Metrics endpoint

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use bc_cache::PhoneValidationCache;
use bc_common::capability::{Clock, SystemClock};
use bc_config::AppConfig;
use bc_events::{BroadcastSubscriberSink, RealTimeEmitter};
use bc_queue::{CampaignStore, MessageQueueStore, RecoveryTask};
use bc_runner::api::create_router as create_api_router;
use bc_runner::{EmergencyMonitorSettings, HttpChatTransport, HttpChatTransportConfig, Orchestrator};

/// Blast Campaign Execution Core development server
#[derive(Parser, Debug)]
#[command(name = "bc-dev")]
#[command(about = "Blast Campaign Execution Core development monolith")]
struct Args {
    /// Path to a TOML config file (falls back to the standard search paths).
    #[arg(long, env = "BLAST_CONFIG")]
    config: Option<String>,

    /// Base URL of the chat channel's transport API.
    #[arg(long, env = "BLAST_TRANSPORT_BASE_URL", default_value = "http://localhost:9100")]
    transport_base_url: String,

    /// Bearer token for the transport API, if required.
    #[arg(long, env = "BLAST_TRANSPORT_AUTH_TOKEN")]
    transport_auth_token: Option<String>,

    /// Metrics server port.
    #[arg(long, env = "BLAST_METRICS_PORT", default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    bc_common::logging::init_logging("bc-dev");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };

    info!(http_port = config.http.port, metrics_port = args.metrics_port, "starting Blast Campaign Execution Core dev monolith");

    let pool = SqlitePoolOptions::new().max_connections(config.database.max_connections).connect(&config.database.url).await?;

    bc_queue::create_schema(&pool).await?;
    let campaign_store = Arc::new(CampaignStore::new(pool.clone()));
    let queue_store = Arc::new(MessageQueueStore::new(pool.clone()));

    let cache = Arc::new(PhoneValidationCache::new(pool.clone()));
    cache.create_schema().await?;

    let sink = Arc::new(BroadcastSubscriberSink::new(256));
    let emitter = Arc::new(RealTimeEmitter::new(sink.clone()));

    let transport_config = {
        let mut cfg = HttpChatTransportConfig::new(args.transport_base_url.clone());
        cfg.auth_token = args.transport_auth_token.clone();
        cfg.timeout = Duration::from_secs(config.transport.send_timeout_secs);
        cfg
    };
    let transport = Arc::new(HttpChatTransport::new(transport_config));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let emergency_monitor_settings = EmergencyMonitorSettings {
        ban_rate_threshold: config.emergency_monitor.ban_rate_threshold,
        sweep_interval: Duration::from_secs(config.emergency_monitor.rolling_window_secs),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&campaign_store),
        Arc::clone(&queue_store),
        Arc::clone(&cache),
        Arc::clone(&emitter),
        transport,
        clock,
        emergency_monitor_settings,
    ));

    if config.emergency_monitor.enabled {
        orchestrator.start_emergency_monitor();
    }

    let recovery = RecoveryTask::new(
        Arc::clone(&queue_store),
        Duration::from_secs(config.runner.recovery_interval_secs),
        chrono::Duration::seconds(config.runner.claim_stale_threshold_secs as i64),
    );
    tokio::spawn(recovery.run());

    let api_app = create_api_router(Arc::clone(&orchestrator), sink)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let http_addr = format!("{}:{}", config.http.host, config.http.port);
    info!(addr = %http_addr, "control-plane API listening");
    let http_listener = TcpListener::bind(&http_addr).await?;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, api_app).await {
            error!(error = %e, "control-plane API server error");
        }
    });

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let metrics_app = Router::new()
        .route("/metrics", get(move || async move { prometheus_handle.render() }))
        .route("/health", get(health_handler));

    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    info!(addr = %metrics_addr, "metrics server listening");
    let metrics_listener = TcpListener::bind(&metrics_addr).await?;
    let metrics_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!(error = %e, "metrics server error");
        }
    });

    info!("Blast Campaign Execution Core dev monolith started, press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received");

    api_handle.abort();
    metrics_handle.abort();

    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install signal handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
