//! Alarm Lifecycle
//!
//! Turns confirmed transitions into durable alarm records:
//! - normal→violation: upload snapshots, create the alarm, bind its id back
//!   into the tracker, broadcast it
//! - violation→normal: stamp the end time of the bound alarm
//!
//! All of it runs on a bounded pool of tokio tasks fed by per-shard queues,
//! so analysis workers never wait on storage or network I/O. Transitions of
//! one source key always land on the same shard and execute in order.

mod coordinator;
mod snapshot;
mod stats;

pub use coordinator::{LifecycleConfig, LifecycleContext, LifecycleCoordinator, TransitionResult};
pub use snapshot::{FileSnapshotStore, SnapshotStore};
pub use stats::{LifecycleStats, LifecycleStatsSnapshot};

use alarm_tracker::{AlarmId, SourceKey};
use storage::StorageError;
use thiserror::Error;

/// Snapshot persistence errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Annotated image is malformed ({width}x{height}, {len} bytes)")]
    InvalidImage { width: u32, height: u32, len: usize },
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Upload failed: {0}")]
    Upload(String),
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Io(err.to_string())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Lifecycle queue for {0} is full, transition dropped")]
    QueueFull(SourceKey),
    #[error("Lifecycle coordinator is shut down")]
    ShutDown,
    #[error("All {attempted} snapshot uploads failed for {key}")]
    SnapshotFailure { key: SourceKey, attempted: usize },
    #[error("Persistence failed for {key}: {source}")]
    PersistenceFailure {
        key: SourceKey,
        #[source]
        source: StorageError,
    },
    #[error("Closing alarm {alarm_id} failed: {source}")]
    CloseFailure {
        alarm_id: AlarmId,
        #[source]
        source: StorageError,
    },
}
