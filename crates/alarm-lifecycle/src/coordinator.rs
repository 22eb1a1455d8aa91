//! Lifecycle Coordinator Implementation

use crate::snapshot::SnapshotStore;
use crate::stats::{LifecycleStats, LifecycleStatsSnapshot};
use crate::LifecycleError;
use alarm_tracker::{AlarmId, CameraId, ChangeType, DebounceTracker, Scenario, SourceKey};
use broadcast::{AlarmEvent, BroadcastDispatcher};
use camera_capture::VideoFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use storage::{AlarmRecord, AlarmStore, NewAlarm};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Number of I/O tasks (default: 4)
    pub pool_size: usize,
    /// Pending transitions per task before opens are dropped. Closes of a
    /// persisted alarm are parked instead.
    pub queue_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 256,
        }
    }
}

/// A confirmed transition handed over by an analysis worker
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub change_type: ChangeType,
    pub camera_id: CameraId,
    pub scenario: Scenario,
    /// Alarm to close (violation→normal only)
    pub alarm_id: Option<AlarmId>,
    /// Violation episode reported by the tracker
    pub episode: u64,
    /// When the transition was confirmed
    pub occurred_at: DateTime<Utc>,
    /// Annotated frames to persist (normal→violation only)
    pub annotated_images: Vec<VideoFrame>,
}

impl TransitionResult {
    pub fn key(&self) -> SourceKey {
        SourceKey::new(self.camera_id, self.scenario)
    }

    /// True for a violation→normal transition that owns an open alarm
    pub fn closes_alarm(&self) -> bool {
        self.change_type == ChangeType::ViolationToNormal && self.alarm_id.is_some()
    }
}

/// Collaborators the coordinator drives
#[derive(Clone)]
pub struct LifecycleContext {
    pub tracker: Arc<DebounceTracker>,
    pub store: Arc<dyn AlarmStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub dispatcher: Arc<BroadcastDispatcher>,
}

struct Handler {
    ctx: LifecycleContext,
    stats: Arc<LifecycleStats>,
}

type Backlog = Arc<Mutex<VecDeque<TransitionResult>>>;

/// One I/O task's inbox. Closes that do not fit in the queue wait in the
/// backlog; while it is non-empty every submission goes behind it.
#[derive(Clone)]
struct Shard {
    queue: mpsc::Sender<TransitionResult>,
    backlog: Backlog,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded pool executing alarm side effects in per-key FIFO order
pub struct LifecycleCoordinator {
    shards: Mutex<Vec<Shard>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<LifecycleStats>,
}

impl LifecycleCoordinator {
    /// Spawn the task pool. Must be called from within a tokio runtime.
    pub fn start(config: LifecycleConfig, ctx: LifecycleContext) -> Self {
        let pool_size = config.pool_size.max(1);
        let capacity = config.queue_capacity.max(1);
        info!(
            "Starting lifecycle coordinator: pool_size={}, queue_capacity={}",
            pool_size, capacity
        );

        let stats = Arc::new(LifecycleStats::default());
        let handler = Arc::new(Handler {
            ctx,
            stats: Arc::clone(&stats),
        });

        let mut shards = Vec::with_capacity(pool_size);
        let mut tasks = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            let (queue, rx) = mpsc::channel(capacity);
            let backlog = Backlog::default();
            tasks.push(tokio::spawn(Arc::clone(&handler).run(index, rx, Arc::clone(&backlog))));
            shards.push(Shard { queue, backlog });
        }

        Self {
            shards: Mutex::new(shards),
            tasks: Mutex::new(tasks),
            stats,
        }
    }

    /// Queue a transition without blocking. Safe to call from any thread.
    ///
    /// When the shard is saturated an open is dropped with `QueueFull`; the
    /// matching close then finds no bound alarm. A close that owns an alarm
    /// is parked in the shard backlog and always runs.
    pub fn try_submit(&self, mut transition: TransitionResult) -> Result<(), LifecycleError> {
        let key = transition.key();
        let shard = {
            let shards = lock(&self.shards);
            if shards.is_empty() {
                return Err(LifecycleError::ShutDown);
            }
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            shards[(hasher.finish() % shards.len() as u64) as usize].clone()
        };

        let mut backlog = lock(&shard.backlog);
        if backlog.is_empty() {
            match shard.queue.try_send(transition) {
                Ok(()) => {
                    self.stats.record_submitted();
                    return Ok(());
                }
                Err(TrySendError::Full(rejected)) => transition = rejected,
                Err(TrySendError::Closed(_)) => return Err(LifecycleError::ShutDown),
            }
        }

        if transition.closes_alarm() {
            backlog.push_back(transition);
            self.stats.record_submitted();
            self.stats.record_deferred_close();
            warn!(%key, parked = backlog.len(), "Lifecycle queue full, parking alarm close");
            return Ok(());
        }

        self.stats.record_dropped();
        error!(
            %key,
            "Lifecycle queue full, dropping {} transition",
            transition.change_type.as_str()
        );
        Err(LifecycleError::QueueFull(key))
    }

    pub fn stats(&self) -> LifecycleStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting work and wait for queued transitions to finish
    pub async fn shutdown(&self) {
        lock(&self.shards).clear();
        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Lifecycle task ended abnormally: {}", e);
            }
        }
        info!("Lifecycle coordinator stopped: {:?}", self.stats());
    }
}

impl Handler {
    async fn run(self: Arc<Self>, index: usize, mut rx: mpsc::Receiver<TransitionResult>, backlog: Backlog) {
        debug!("Lifecycle task {} started", index);
        loop {
            // Submitters only park while holding this lock, and only behind
            // a full queue, so the queue always drains before the backlog
            let ready = {
                let mut parked = lock(&backlog);
                match rx.try_recv() {
                    Ok(transition) => Some(transition),
                    Err(_) => parked.pop_front(),
                }
            };

            let transition = match ready {
                Some(transition) => transition,
                None => match rx.recv().await {
                    Some(transition) => transition,
                    None => break,
                },
            };
            self.handle(transition).await;
        }

        // Every sender is gone; nothing can be parked after this
        let leftover: Vec<_> = lock(&backlog).drain(..).collect();
        for transition in leftover {
            self.handle(transition).await;
        }
        debug!("Lifecycle task {} drained", index);
    }

    async fn handle(&self, transition: TransitionResult) {
        let key = transition.key();
        let result = match transition.change_type {
            ChangeType::NormalToViolation => self.open_alarm(transition).await,
            ChangeType::ViolationToNormal => self.close_alarm(transition).await,
        };

        if let Err(e) = result {
            // Snapshot failures are counted per image during upload
            if matches!(
                e,
                LifecycleError::PersistenceFailure { .. } | LifecycleError::CloseFailure { .. }
            ) {
                self.stats.record_persistence_failure();
            }
            error!(%key, "Alarm side effect failed: {}", e);
        }
    }

    async fn upload_snapshots(&self, transition: &TransitionResult) -> Result<Vec<String>, LifecycleError> {
        let mut urls = Vec::with_capacity(transition.annotated_images.len());
        for image in &transition.annotated_images {
            match self.ctx.snapshots.upload(image, transition.camera_id).await {
                Ok(url) => {
                    debug!("Snapshot stored at {}", url);
                    urls.push(url);
                }
                Err(e) => {
                    self.stats.record_snapshot_failure();
                    warn!(key = %transition.key(), "Snapshot upload failed: {}", e);
                }
            }
        }

        if urls.is_empty() && !transition.annotated_images.is_empty() {
            return Err(LifecycleError::SnapshotFailure {
                key: transition.key(),
                attempted: transition.annotated_images.len(),
            });
        }
        Ok(urls)
    }

    async fn open_alarm(&self, transition: TransitionResult) -> Result<(), LifecycleError> {
        let key = transition.key();
        let urls = self.upload_snapshots(&transition).await?;

        let record = self
            .ctx
            .store
            .create_alarm(NewAlarm::open(
                transition.camera_id,
                transition.scenario,
                transition.occurred_at,
                urls,
            ))
            .await
            .map_err(|source| LifecycleError::PersistenceFailure { key, source })?;
        self.stats.record_opened();
        info!(%key, "Opened alarm {} ({})", record.alarm_id, transition.scenario.description());

        let bound = self
            .ctx
            .tracker
            .bind_alarm_id(key, transition.episode, record.alarm_id);

        self.ctx.dispatcher.broadcast(AlarmEvent::opened(&record));

        if !bound {
            // The violation ended before the alarm was persisted
            self.close_orphan(&record, key, transition.episode).await?;
        }
        Ok(())
    }

    async fn close_orphan(&self, record: &AlarmRecord, key: SourceKey, episode: u64) -> Result<(), LifecycleError> {
        let ended_at = match self.ctx.tracker.episode_ended_at(&key, episode) {
            Some(at) => at,
            None => {
                // A later episode already ended too, or the key was reset
                warn!(%key, episode, "End time of the violation is gone, closing alarm at now");
                Utc::now()
            }
        };
        self.ctx
            .store
            .close_alarm(record.alarm_id, ended_at)
            .await
            .map_err(|source| LifecycleError::CloseFailure {
                alarm_id: record.alarm_id,
                source,
            })?;
        self.stats.record_orphan_closed();
        warn!("Closed alarm {} whose violation already ended", record.alarm_id);
        self.ctx.dispatcher.broadcast(AlarmEvent::closed(record, ended_at));
        Ok(())
    }

    async fn close_alarm(&self, transition: TransitionResult) -> Result<(), LifecycleError> {
        let key = transition.key();
        let Some(alarm_id) = transition.alarm_id else {
            self.stats.record_unbound_close();
            info!(%key, "Violation ended with no bound alarm, nothing to close");
            return Ok(());
        };

        self.ctx
            .store
            .close_alarm(alarm_id, transition.occurred_at)
            .await
            .map_err(|source| LifecycleError::CloseFailure { alarm_id, source })?;
        self.stats.record_closed();
        info!(%key, "Closed alarm {}", alarm_id);

        match self.ctx.store.get_alarm(alarm_id).await {
            Ok(record) => {
                self.ctx
                    .dispatcher
                    .broadcast(AlarmEvent::closed(&record, transition.occurred_at));
            }
            Err(e) => warn!(%key, "Closed alarm {} could not be reloaded for broadcast: {}", alarm_id, e),
        }
        Ok(())
    }
}
