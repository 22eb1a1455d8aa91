//! SQLite alarm store

use crate::{AlarmLevel, AlarmRecord, AlarmStatus, AlarmStore, NewAlarm, StorageError};
use alarm_tracker::{AlarmId, CameraId, Scenario};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS alarm_main (
    alarm_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id     INTEGER NOT NULL,
    alarm_type    INTEGER NOT NULL,
    alarm_level   INTEGER NOT NULL DEFAULT 2,
    alarm_status  INTEGER NOT NULL DEFAULT 0,
    alarm_time    INTEGER NOT NULL,
    alarm_end_time INTEGER,
    alarm_desc    TEXT,
    snapshot_urls TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_alarm_main_camera ON alarm_main (camera_id)",
];

/// Alarm store backed by a SQLite database
pub struct SqliteAlarmStore {
    pool: SqlitePool,
}

impl SqliteAlarmStore {
    /// Connect to `url` (e.g. `sqlite://alarms.db`), creating the file and
    /// schema if needed
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected alarm store at {}", url);
        Ok(store)
    }

    /// Private in-memory database (single connection, gone on drop)
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn timestamp(ms: i64) -> Result<DateTime<Utc>, StorageError> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| StorageError::SerializationError(format!("invalid timestamp {}", ms)))
    }

    fn record_from_row(row: &SqliteRow) -> Result<AlarmRecord, StorageError> {
        let scenario_code: i64 = row.try_get("alarm_type")?;
        let scenario = u8::try_from(scenario_code)
            .ok()
            .and_then(|code| Scenario::from_code(code).ok())
            .ok_or_else(|| StorageError::SerializationError(format!("unknown alarm_type {}", scenario_code)))?;
        let urls: String = row.try_get("snapshot_urls")?;
        let ended_ms: Option<i64> = row.try_get("alarm_end_time")?;

        Ok(AlarmRecord {
            alarm_id: AlarmId(row.try_get("alarm_id")?),
            camera_id: CameraId(row.try_get("camera_id")?),
            scenario,
            status: AlarmStatus::from_code(row.try_get("alarm_status")?),
            level: AlarmLevel::from_code(row.try_get("alarm_level")?),
            started_at: Self::timestamp(row.try_get("alarm_time")?)?,
            ended_at: ended_ms.map(Self::timestamp).transpose()?,
            snapshot_urls: serde_json::from_str(&urls)?,
            description: row.try_get::<Option<String>, _>("alarm_desc")?.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl AlarmStore for SqliteAlarmStore {
    async fn create_alarm(&self, alarm: NewAlarm) -> Result<AlarmRecord, StorageError> {
        let urls = serde_json::to_string(&alarm.snapshot_urls)?;
        let result = sqlx::query(
            "INSERT INTO alarm_main
                (camera_id, alarm_type, alarm_level, alarm_status, alarm_time, alarm_desc, snapshot_urls)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(alarm.camera_id.0)
        .bind(alarm.scenario.code() as i64)
        .bind(alarm.level.code())
        .bind(alarm.status.code())
        .bind(alarm.started_at.timestamp_millis())
        .bind(alarm.scenario.description())
        .bind(urls)
        .execute(&self.pool)
        .await?;

        let alarm_id = AlarmId(result.last_insert_rowid());
        debug!("Inserted alarm with ID {}", alarm_id);
        Ok(AlarmRecord::from_new(alarm_id, alarm))
    }

    async fn close_alarm(&self, alarm_id: AlarmId, ended_at: DateTime<Utc>) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE alarm_main SET alarm_end_time = ? WHERE alarm_id = ? AND alarm_end_time IS NULL",
        )
        .bind(ended_at.timestamp_millis())
        .bind(alarm_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing row from one that was closed already
            self.get_alarm(alarm_id).await?;
            return Err(StorageError::AlreadyClosed(alarm_id));
        }
        debug!("Closed alarm {}", alarm_id);
        Ok(())
    }

    async fn get_alarm(&self, alarm_id: AlarmId) -> Result<AlarmRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM alarm_main WHERE alarm_id = ?")
            .bind(alarm_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound(alarm_id))?;
        Self::record_from_row(&row)
    }

    async fn list_alarms(
        &self,
        camera_id: Option<CameraId>,
        limit: usize,
    ) -> Result<Vec<AlarmRecord>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match camera_id {
            Some(camera) => {
                sqlx::query("SELECT * FROM alarm_main WHERE camera_id = ? ORDER BY alarm_id DESC LIMIT ?")
                    .bind(camera.0)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM alarm_main ORDER BY alarm_id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_alarm(camera: i64, scenario: Scenario) -> NewAlarm {
        // Millisecond precision survives the round trip through the table
        let started_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        NewAlarm::open(CameraId(camera), scenario, started_at, vec!["http://s/a.jpg".into(), "http://s/b.jpg".into()])
    }

    #[tokio::test]
    async fn test_create_get_close() {
        let store = SqliteAlarmStore::in_memory().await.unwrap();

        let created = store.create_alarm(new_alarm(3, Scenario::Fire)).await.unwrap();
        let fetched = store.get_alarm(created.alarm_id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.snapshot_urls.len(), 2);

        let ended = Utc.timestamp_millis_opt(1_700_000_005_000).unwrap();
        store.close_alarm(created.alarm_id, ended).await.unwrap();
        assert_eq!(store.get_alarm(created.alarm_id).await.unwrap().ended_at, Some(ended));

        assert!(matches!(
            store.close_alarm(created.alarm_id, ended).await,
            Err(StorageError::AlreadyClosed(_))
        ));
        assert!(matches!(
            store.close_alarm(AlarmId(999), ended).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = SqliteAlarmStore::in_memory().await.unwrap();
        store.create_alarm(new_alarm(1, Scenario::Fire)).await.unwrap();
        store.create_alarm(new_alarm(2, Scenario::AreaIntrusion)).await.unwrap();
        let last = store.create_alarm(new_alarm(1, Scenario::SafetyCompliance)).await.unwrap();

        let listed = store.list_alarms(Some(CameraId(1)), 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].alarm_id, last.alarm_id);
        assert_eq!(store.list_alarms(None, 1).await.unwrap().len(), 1);
    }
}
