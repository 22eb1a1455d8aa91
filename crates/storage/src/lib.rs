//! Storage Layer
//!
//! Persists alarm records. The analysis core only opens and closes alarms;
//! human handling of alarms lives in the CRUD layer on top of the same table.

mod record;
mod repository;
mod sqlite;

pub use record::{AlarmLevel, AlarmRecord, AlarmStatus, NewAlarm};
pub use repository::AlarmRepository;
pub use sqlite::SqliteAlarmStore;

use alarm_tracker::{AlarmId, CameraId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Alarm {0} not found")]
    NotFound(AlarmId),
    #[error("Alarm {0} is already closed")]
    AlreadyClosed(AlarmId),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Alarm persistence used by the lifecycle coordinator
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Insert a new alarm and return the stored record with its id
    async fn create_alarm(&self, alarm: NewAlarm) -> Result<AlarmRecord, StorageError>;

    /// Stamp the end time of an open alarm
    async fn close_alarm(&self, alarm_id: AlarmId, ended_at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Fetch one alarm
    async fn get_alarm(&self, alarm_id: AlarmId) -> Result<AlarmRecord, StorageError>;

    /// Most recent alarms first, optionally for one camera
    async fn list_alarms(
        &self,
        camera_id: Option<CameraId>,
        limit: usize,
    ) -> Result<Vec<AlarmRecord>, StorageError>;
}
