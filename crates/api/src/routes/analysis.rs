//! Analysis control routes

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResponse};
use crate::source::SourceSpec;
use crate::AppState;
use alarm_tracker::{CameraId, ScenarioSet, TrackerError};
use analysis::{AnalysisError, StartOutcome, StopOutcome, WorkerInfo};

/// Which scenarios a request targets: explicit codes win over the legacy
/// analysis mode; neither means every scenario
#[derive(Debug, Default, Deserialize)]
pub struct ScenarioSelector {
    #[serde(default)]
    pub analysis_mode: Option<u8>,
    #[serde(default)]
    pub scenarios: Option<Vec<u8>>,
}

impl ScenarioSelector {
    pub fn resolve(&self) -> Result<ScenarioSet, TrackerError> {
        match (&self.scenarios, self.analysis_mode) {
            (Some(codes), _) => ScenarioSet::from_codes(codes),
            (None, Some(mode)) => ScenarioSet::from_analysis_mode(mode),
            (None, None) => Ok(ScenarioSet::all()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub camera_id: i64,
    #[serde(flatten)]
    pub selector: ScenarioSelector,
    pub source: SourceSpec,
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub camera_id: i64,
    #[serde(flatten)]
    pub selector: ScenarioSelector,
}

/// Worker state after a start or stop request
#[derive(Debug, Serialize)]
pub struct AnalysisStatus {
    pub camera_id: CameraId,
    pub scenarios: ScenarioSet,
    pub scenario_codes: Vec<u8>,
    pub running: bool,
}

impl AnalysisStatus {
    fn new(camera_id: CameraId, scenarios: ScenarioSet, running: bool) -> Self {
        Self {
            camera_id,
            scenarios,
            scenario_codes: scenarios.codes(),
            running,
        }
    }
}

/// Start a worker; a duplicate start for a running key succeeds without
/// spawning anything
pub async fn start_analysis(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<ApiResponse<AnalysisStatus>>, ApiError> {
    metrics::counter!("control_requests_total", "action" => "start").increment(1);
    let scenarios = request.selector.resolve()?;
    let camera_id = CameraId(request.camera_id);
    let monitor = Arc::clone(&state.monitor);
    let spec = request.source;

    // Source construction and opening touch the filesystem
    let outcome = tokio::task::spawn_blocking(move || -> Result<StartOutcome, ApiError> {
        let source = spec.build().map_err(|e| AnalysisError::SourceUnavailable {
            source_name: spec.location(),
            reason: e.to_string(),
        })?;
        Ok(monitor.start_analysis(camera_id, scenarios, source)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    let msg = match outcome {
        StartOutcome::Started(_) => "analysis started",
        StartOutcome::AlreadyRunning(_) => "analysis already running",
    };
    Ok(ApiResponse::with_msg(msg, AnalysisStatus::new(camera_id, scenarios, true)))
}

/// Signal a worker to stop; the key is released immediately
pub async fn stop_analysis(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StopRequest>,
) -> Result<Json<ApiResponse<AnalysisStatus>>, ApiError> {
    metrics::counter!("control_requests_total", "action" => "stop").increment(1);
    let scenarios = request.selector.resolve()?;
    let camera_id = CameraId(request.camera_id);

    let msg = match state.monitor.stop_analysis(camera_id, scenarios) {
        StopOutcome::Stopping(_) => "analysis stopping",
        StopOutcome::NotRunning(_) => "analysis not running",
    };
    Ok(ApiResponse::with_msg(msg, AnalysisStatus::new(camera_id, scenarios, false)))
}

/// Registered workers
pub async fn list_workers(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<WorkerInfo>>> {
    ApiResponse::ok(state.monitor.workers())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_tracker::Scenario;

    fn selector(json: &str) -> ScenarioSelector {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_selector_resolution() {
        assert_eq!(selector("{}").resolve().unwrap(), ScenarioSet::all());
        assert_eq!(
            selector(r#"{"analysis_mode": 4}"#).resolve().unwrap(),
            ScenarioSet::single(Scenario::Fire)
        );
        assert_eq!(
            selector(r#"{"analysis_mode": 1, "scenarios": [1]}"#).resolve().unwrap(),
            ScenarioSet::single(Scenario::AreaIntrusion)
        );
        assert_eq!(
            selector(r#"{"analysis_mode": 7}"#).resolve(),
            Err(TrackerError::InvalidAnalysisMode(7))
        );
        assert_eq!(selector(r#"{"scenarios": []}"#).resolve(), Err(TrackerError::EmptyScenarioSet));
    }
}
