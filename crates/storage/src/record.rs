//! Alarm record types

use alarm_tracker::{AlarmId, CameraId, Scenario};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Handling status. The analysis core only ever writes `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmStatus {
    #[default]
    Open,
    Handled,
}

impl AlarmStatus {
    pub fn code(&self) -> i64 {
        match self {
            AlarmStatus::Open => 0,
            AlarmStatus::Handled => 1,
        }
    }

    /// Any non-zero status counts as handled
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            AlarmStatus::Open
        } else {
            AlarmStatus::Handled
        }
    }
}

/// Risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl AlarmLevel {
    pub fn code(&self) -> i64 {
        match self {
            AlarmLevel::Low => 1,
            AlarmLevel::Medium => 2,
            AlarmLevel::High => 3,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => AlarmLevel::Low,
            3 => AlarmLevel::High,
            _ => AlarmLevel::Medium,
        }
    }
}

/// Alarm to be inserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAlarm {
    pub camera_id: CameraId,
    pub scenario: Scenario,
    pub status: AlarmStatus,
    pub level: AlarmLevel,
    pub started_at: DateTime<Utc>,
    pub snapshot_urls: Vec<String>,
}

impl NewAlarm {
    /// Open alarm with the default level and the scenario's description
    pub fn open(camera_id: CameraId, scenario: Scenario, started_at: DateTime<Utc>, snapshot_urls: Vec<String>) -> Self {
        Self {
            camera_id,
            scenario,
            status: AlarmStatus::Open,
            level: AlarmLevel::default(),
            started_at,
            snapshot_urls,
        }
    }
}

/// Stored alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub alarm_id: AlarmId,
    pub camera_id: CameraId,
    pub scenario: Scenario,
    pub status: AlarmStatus,
    pub level: AlarmLevel,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub snapshot_urls: Vec<String>,
    pub description: String,
}

impl AlarmRecord {
    pub(crate) fn from_new(alarm_id: AlarmId, alarm: NewAlarm) -> Self {
        Self {
            alarm_id,
            camera_id: alarm.camera_id,
            description: alarm.scenario.description().to_string(),
            scenario: alarm.scenario,
            status: alarm.status,
            level: alarm.level,
            started_at: alarm.started_at,
            ended_at: None,
            snapshot_urls: alarm.snapshot_urls,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }
}
