//! Alarm event payload

use alarm_tracker::{AlarmId, CameraId, Scenario};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::{AlarmRecord, AlarmStatus};

/// Which edge of the alarm the event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Opened,
    Closed,
}

/// Event pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub kind: EventKind,
    pub alarm_id: AlarmId,
    pub camera_id: CameraId,
    pub scenario: Scenario,
    pub scenario_code: u8,
    pub status: AlarmStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub snapshot_urls: Vec<String>,
}

impl AlarmEvent {
    /// Event for a freshly opened alarm
    pub fn opened(record: &AlarmRecord) -> Self {
        Self::from_record(EventKind::Opened, record)
    }

    /// Event for an alarm that just ended at `ended_at`
    pub fn closed(record: &AlarmRecord, ended_at: DateTime<Utc>) -> Self {
        Self {
            ended_at: Some(ended_at),
            ..Self::from_record(EventKind::Closed, record)
        }
    }

    fn from_record(kind: EventKind, record: &AlarmRecord) -> Self {
        Self {
            kind,
            alarm_id: record.alarm_id,
            camera_id: record.camera_id,
            scenario: record.scenario,
            scenario_code: record.scenario.code(),
            status: record.status,
            started_at: record.started_at,
            ended_at: record.ended_at,
            snapshot_urls: record.snapshot_urls.clone(),
        }
    }

    /// JSON text frame for push transports
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
