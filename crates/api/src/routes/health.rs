//! Health Route

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiResponse;
use crate::AppState;
use analysis::MonitorStats;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: u64,
    pub monitor: MonitorStats,
}

/// Liveness plus pipeline counters
pub async fn health(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthResponse>> {
    let monitor = state.monitor.stats();
    let status = if monitor.lifecycle.dropped > 0 || monitor.lifecycle.persistence_failures > 0 {
        "degraded"
    } else {
        "healthy"
    };

    ApiResponse::ok(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        monitor,
    })
}
