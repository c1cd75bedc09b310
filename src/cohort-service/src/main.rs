//! Cohort — user segment membership service.
//!
//! Loads configuration, starts the metrics exporter and serves the REST API
//! until SIGINT/SIGTERM.

use cohort_api::ApiServer;
use cohort_core::config::AppConfig;
use cohort_segmentation::SegmentService;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cohort-service")]
#[command(about = "User segment membership service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "COHORT__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "COHORT__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics exporter port (overrides config)
    #[arg(long, env = "COHORT__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Directory for monthly history exports (overrides config)
    #[arg(long, env = "COHORT__EXPORT__DIR")]
    export_dir: Option<String>,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cohort_service=info,cohort_api=info,cohort_segmentation=info,tower_http=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Cohort starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(dir) = cli.export_dir {
        config.export.dir = dir;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        export_dir = %config.export.dir,
        max_ttl_days = config.membership.max_ttl_days,
        "Configuration loaded"
    );

    let service = Arc::new(SegmentService::in_memory(&config));
    let api_server = ApiServer::new(config, service);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Cohort is ready to serve traffic");

    api_server.start_http(shutdown_signal()).await?;

    info!("Cohort stopped");
    Ok(())
}
