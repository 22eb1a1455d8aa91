//! Alarm Routes

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResponse};
use crate::AppState;
use alarm_tracker::CameraId;
use storage::AlarmRecord;

/// Query parameters for the alarm listing
#[derive(Debug, Deserialize)]
pub struct AlarmQuery {
    /// Filter by camera
    pub camera_id: Option<i64>,
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct AlarmList {
    pub count: usize,
    pub open_count: usize,
    pub alarms: Vec<AlarmRecord>,
}

/// Most recent alarms, newest first
pub async fn list_alarms(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlarmQuery>,
) -> Result<Json<ApiResponse<AlarmList>>, ApiError> {
    let limit = params.limit.min(500);
    let alarms = state
        .monitor
        .store()
        .list_alarms(params.camera_id.map(CameraId), limit)
        .await?;

    Ok(ApiResponse::ok(AlarmList {
        count: alarms.len(),
        open_count: alarms.iter().filter(|a| !a.is_closed()).count(),
        alarms,
    }))
}
