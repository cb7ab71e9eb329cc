//! Read-only HTTP surface
//!
//! - `GET /neighbors` - routed neighbors as JSON, sorted by address
//! - `GET /metrics` - Prometheus text format
//! - `GET /health` - liveness and tracked neighbor count
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-6: Audit Record Review - Metrics endpoint for analysis
//! - SI-4: System Monitoring - HTTP endpoint for monitoring systems

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::neighbor_table::NeighborTable;
use crate::types::Neighbor;
use axum::{
    Json, Router, extract::State, http::StatusCode, response::IntoResponse, response::Response,
    routing::get,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// One routed neighbor as exposed over HTTP
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborView {
    pub ip: String,
    pub link_index: u32,
}

/// Views of a snapshot, ordered by address (IPv4 before IPv6)
pub fn neighbor_views(mut neighbors: Vec<Neighbor>) -> Vec<NeighborView> {
    neighbors.sort_by_key(|n| n.address);
    neighbors
        .into_iter()
        .map(|n| NeighborView {
            ip: n.address.to_string(),
            link_index: n.link_index,
        })
        .collect()
}

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub table: Arc<NeighborTable>,
    pub metrics: MetricsCollector,
}

impl ApiState {
    pub fn new(table: Arc<NeighborTable>, metrics: MetricsCollector) -> Self {
        Self { table, metrics }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/neighbors", get(list_neighbors))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind `addr` and serve until the task is dropped
pub async fn serve(addr: SocketAddr, state: ApiState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Starting HTTP server");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub async fn list_neighbors(State(state): State<ApiState>) -> Json<Vec<NeighborView>> {
    Json(neighbor_views(state.table.snapshot()))
}

pub async fn metrics_handler(State(state): State<ApiState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

pub async fn health_handler(State(state): State<ApiState>) -> Response {
    let body = serde_json::json!({
        "status": "healthy",
        "tracked_neighbors": state.table.len(),
    });
    (StatusCode::OK, Json(body)).into_response()
}
