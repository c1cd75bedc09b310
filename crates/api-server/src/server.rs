//! API server — HTTP REST surface plus the Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use cohort_core::config::AppConfig;
use cohort_segmentation::SegmentService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Route table with middleware, independent of any listener.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Segments
        .route("/api/v1/segments", post(rest::create_segment))
        .route("/api/v1/segments/auto-assign", post(rest::auto_assign_segment))
        .route("/api/v1/segments/:slug", delete(rest::delete_segment))
        // Users and memberships
        .route("/api/v1/users", post(rest::create_user))
        .route(
            "/api/v1/users/:user_id/segments",
            patch(rest::edit_user_segments).get(rest::user_segments),
        )
        // Audit history
        .route("/api/v1/history", get(rest::export_history))
        .route("/api/v1/history/files/:file_name", get(rest::download_history))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    service: Arc<SegmentService>,
}

impl ApiServer {
    pub fn new(config: AppConfig, service: Arc<SegmentService>) -> Self {
        Self { config, service }
    }

    /// Serve the REST API until `shutdown` resolves.
    pub async fn start_http<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(AppState {
            service: self.service.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        });

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the metrics exporter on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
