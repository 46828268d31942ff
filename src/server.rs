//! HTTP server for health and metrics endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::metrics::Metrics;
use crate::relay::RelayReport;
use crate::types::Direction;

/// Watch-loop statistics shared with the HTTP server
#[derive(Debug, Default, Clone)]
pub struct WardenStats {
    pub warden: String,
    pub cycles: u64,
    pub relayed_total: u64,
    pub source_cursor: Option<u64>,
    pub destination_cursor: Option<u64>,
    pub last_error: Option<String>,
}

impl WardenStats {
    pub fn record(&mut self, report: &RelayReport) {
        self.relayed_total += report.relayed as u64;
        if let Some(cursor) = report.committed_cursor {
            match report.direction {
                Direction::SourceToDestination => self.source_cursor = Some(cursor),
                Direction::DestinationToSource => self.destination_cursor = Some(cursor),
            }
        }
    }
}

pub type SharedStats = Arc<RwLock<WardenStats>>;
pub type SharedMetrics = Arc<Metrics>;

#[derive(Clone)]
pub struct AppState {
    pub stats: SharedStats,
    pub metrics: SharedMetrics,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub warden: String,
    pub cycles: u64,
    pub relayed_total: u64,
    pub source_cursor: Option<u64>,
    pub destination_cursor: Option<u64>,
    pub last_error: Option<String>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.stats.read().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        warden: stats.warden.clone(),
        cycles: stats.cycles,
        relayed_total: stats.relayed_total,
        source_cursor: stats.source_cursor,
        destination_cursor: stats.destination_cursor,
        last_error: stats.last_error.clone(),
    })
}

/// Ready once a poll cycle has completed
async fn readiness(State(state): State<AppState>) -> &'static str {
    if state.stats.read().await.cycles > 0 {
        "OK"
    } else {
        "NOT_READY"
    }
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve health and metrics on `0.0.0.0:port`
pub async fn start_server(port: u16, stats: SharedStats, metrics: SharedMetrics) -> eyre::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState { stats, metrics });

    info!("Health server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
