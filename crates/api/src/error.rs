//! Response envelope and API errors

use alarm_tracker::TrackerError;
use analysis::AnalysisError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use storage::StorageError;
use thiserror::Error;
use tracing::{error, warn};

pub const CODE_SUCCESS: u8 = 1;
pub const CODE_FAILURE: u8 = 0;

/// `{code, msg, data}` envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u8,
    pub msg: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Self::with_msg("success", data)
    }

    pub fn with_msg(msg: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            code: CODE_SUCCESS,
            msg: msg.into(),
            data: Some(data),
        })
    }
}

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Analysis(AnalysisError::Config(_)) => StatusCode::BAD_REQUEST,
            ApiError::Analysis(AnalysisError::SourceUnavailable { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Analysis(AnalysisError::ScenarioConflict { .. } | AnalysisError::StartCancelled(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Analysis(AnalysisError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let body = ApiResponse::<()> {
            code: CODE_FAILURE,
            msg: self.to_string(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_tracker::{AlarmId, CameraId, Scenario, ScenarioSet};
    use analysis::WorkerKey;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(TrackerError::InvalidAnalysisMode(9)).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(StorageError::NotFound(AlarmId(3))).status(),
            StatusCode::NOT_FOUND
        );
        let unavailable = AnalysisError::SourceUnavailable {
            source_name: "rtsp://cam".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(ApiError::from(unavailable).status(), StatusCode::UNPROCESSABLE_ENTITY);

        let conflict = AnalysisError::ScenarioConflict {
            requested: WorkerKey::new(CameraId(1), ScenarioSet::all()),
            running: WorkerKey::new(CameraId(1), ScenarioSet::single(Scenario::Fire)),
        };
        assert_eq!(ApiError::from(conflict).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_envelope_shape() {
        let Json(body) = ApiResponse::ok(vec![1, 2]);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["code"], 1);
        assert_eq!(value["msg"], "success");
        assert_eq!(value["data"], serde_json::json!([1, 2]));
    }
}
