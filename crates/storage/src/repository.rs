//! Repository Implementation

use crate::{AlarmRecord, AlarmStore, NewAlarm, StorageError};
use alarm_tracker::{AlarmId, CameraId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

/// In-memory alarm repository (development and tests)
pub struct AlarmRepository {
    /// Alarm records, oldest first
    alarms: Mutex<VecDeque<AlarmRecord>>,
    /// Max alarm records kept
    max_records: usize,
    /// Next alarm ID
    next_alarm_id: Mutex<i64>,
}

impl AlarmRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        info!("Creating in-memory alarm repository");
        Self {
            alarms: Mutex::new(VecDeque::with_capacity(1000)),
            max_records: 10_000,
            next_alarm_id: Mutex::new(1),
        }
    }

    /// Limit retained records (oldest dropped first)
    pub fn with_retention(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    fn lock_error<E: std::fmt::Display>(e: E) -> StorageError {
        StorageError::DatabaseError(format!("Lock error: {}", e))
    }

    /// Get total alarm count
    pub fn alarm_count(&self) -> usize {
        self.alarms.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        if let Ok(mut alarms) = self.alarms.lock() {
            alarms.clear();
        }
    }
}

impl Default for AlarmRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlarmStore for AlarmRepository {
    async fn create_alarm(&self, alarm: NewAlarm) -> Result<AlarmRecord, StorageError> {
        let mut alarms = self.alarms.lock().map_err(Self::lock_error)?;
        let mut id = self.next_alarm_id.lock().map_err(Self::lock_error)?;

        let record = AlarmRecord::from_new(AlarmId(*id), alarm);
        *id += 1;

        // Enforce retention
        while alarms.len() >= self.max_records {
            alarms.pop_front();
        }

        alarms.push_back(record.clone());
        debug!("Inserted alarm with ID {}", record.alarm_id);
        Ok(record)
    }

    async fn close_alarm(&self, alarm_id: AlarmId, ended_at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut alarms = self.alarms.lock().map_err(Self::lock_error)?;
        let record = alarms
            .iter_mut()
            .find(|a| a.alarm_id == alarm_id)
            .ok_or(StorageError::NotFound(alarm_id))?;

        if record.is_closed() {
            return Err(StorageError::AlreadyClosed(alarm_id));
        }
        record.ended_at = Some(ended_at);
        debug!("Closed alarm {}", alarm_id);
        Ok(())
    }

    async fn get_alarm(&self, alarm_id: AlarmId) -> Result<AlarmRecord, StorageError> {
        let alarms = self.alarms.lock().map_err(Self::lock_error)?;
        alarms
            .iter()
            .find(|a| a.alarm_id == alarm_id)
            .cloned()
            .ok_or(StorageError::NotFound(alarm_id))
    }

    async fn list_alarms(
        &self,
        camera_id: Option<CameraId>,
        limit: usize,
    ) -> Result<Vec<AlarmRecord>, StorageError> {
        let alarms = self.alarms.lock().map_err(Self::lock_error)?;

        Ok(alarms
            .iter()
            .rev()
            .filter(|a| camera_id.map_or(true, |c| a.camera_id == c))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlarmStatus;
    use alarm_tracker::Scenario;

    fn new_alarm(camera: i64) -> NewAlarm {
        NewAlarm::open(
            CameraId(camera),
            Scenario::SafetyCompliance,
            Utc::now(),
            vec!["http://snapshots/1.jpg".to_string()],
        )
    }

    #[tokio::test]
    async fn test_create_and_close() {
        let repo = AlarmRepository::new();

        let record = repo.create_alarm(new_alarm(6)).await.unwrap();
        assert_eq!(record.alarm_id, AlarmId(1));
        assert_eq!(record.status, AlarmStatus::Open);
        assert!(!record.is_closed());

        let ended = Utc::now();
        repo.close_alarm(record.alarm_id, ended).await.unwrap();
        let stored = repo.get_alarm(record.alarm_id).await.unwrap();
        assert_eq!(stored.ended_at, Some(ended));

        assert!(matches!(
            repo.close_alarm(record.alarm_id, ended).await,
            Err(StorageError::AlreadyClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_unknown_alarm() {
        let repo = AlarmRepository::new();
        assert!(matches!(
            repo.close_alarm(AlarmId(42), Utc::now()).await,
            Err(StorageError::NotFound(AlarmId(42)))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_camera() {
        let repo = AlarmRepository::new();
        for camera in [1, 2, 1] {
            repo.create_alarm(new_alarm(camera)).await.unwrap();
        }

        let camera_one = repo.list_alarms(Some(CameraId(1)), 10).await.unwrap();
        assert_eq!(camera_one.len(), 2);
        assert_eq!(camera_one[0].alarm_id, AlarmId(3));

        assert_eq!(repo.list_alarms(None, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retention_limit() {
        let repo = AlarmRepository::new().with_retention(5);
        for _ in 0..10 {
            repo.create_alarm(new_alarm(1)).await.unwrap();
        }
        assert_eq!(repo.alarm_count(), 5);
        assert!(repo.get_alarm(AlarmId(1)).await.is_err());
    }
}
