//! Worker registry
//!
//! At most one analysis worker writes any (camera, scenario) tracker entry.
//! A start reserves its key under the registry lock, rejecting keys whose
//! scenario set overlaps another worker on the same camera. The source is
//! opened outside the lock, then the reservation is committed and the
//! thread spawned. A stop that lands while the source is opening withdraws
//! the reservation and the start reports it as cancelled.
//!
//! `stop` hides the key immediately; the thread finishes its current frame
//! and then deregisters itself, but only if the entry still carries its own
//! generation. A start issued right after a stop therefore gets a fresh
//! worker that the old thread never removes.

use crate::config::AnalysisConfig;
use crate::detector::Detector;
use crate::worker::{TransitionSink, Worker, WorkerContext, WorkerExit, WorkerStats, WorkerStatsSnapshot};
use crate::AnalysisError;
use alarm_tracker::{CameraId, DebounceTracker, ScenarioSet, TrackerError};
use camera_capture::FrameSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Identity of one analysis worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerKey {
    pub camera_id: CameraId,
    pub scenarios: ScenarioSet,
}

impl WorkerKey {
    pub fn new(camera_id: CameraId, scenarios: ScenarioSet) -> Self {
        Self { camera_id, scenarios }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera {} {}", self.camera_id, self.scenarios)
    }
}

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(WorkerKey),
    /// A worker for this key was already running; nothing was spawned
    AlreadyRunning(WorkerKey),
}

impl StartOutcome {
    pub fn key(&self) -> WorkerKey {
        match self {
            StartOutcome::Started(key) | StartOutcome::AlreadyRunning(key) => *key,
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Stop signalled; the thread exits at its next frame boundary
    Stopping(WorkerKey),
    NotRunning(WorkerKey),
}

impl StopOutcome {
    pub fn key(&self) -> WorkerKey {
        match self {
            StopOutcome::Stopping(key) | StopOutcome::NotRunning(key) => *key,
        }
    }
}

/// Public view of a registered worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    #[serde(flatten)]
    pub key: WorkerKey,
    pub generation: u64,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub running: bool,
    pub stats: WorkerStatsSnapshot,
}

struct WorkerHandle {
    generation: u64,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<WorkerExit>,
    source: String,
    started_at: DateTime<Utc>,
    stats: Arc<WorkerStats>,
}

#[derive(Default)]
struct Table {
    running: HashMap<WorkerKey, WorkerHandle>,
    /// Keys whose source is being opened, with the reserved generation
    opening: HashMap<WorkerKey, u64>,
}

impl Table {
    fn holds(&self, key: &WorkerKey) -> bool {
        self.running.contains_key(key) || self.opening.contains_key(key)
    }

    /// Another key on the same camera sharing a scenario with `key`
    fn overlapping(&self, key: &WorkerKey) -> Option<WorkerKey> {
        self.running
            .keys()
            .chain(self.opening.keys())
            .find(|other| {
                other.camera_id == key.camera_id && *other != key && other.scenarios.intersects(&key.scenarios)
            })
            .copied()
    }

    fn publish_gauge(&self) {
        metrics::gauge!("workers_running").set(self.running.len() as f64);
    }
}

struct Inner {
    ctx: WorkerContext,
    table: Mutex<Table>,
    /// Threads that were signalled to stop but not yet joined
    stopping: Mutex<Vec<JoinHandle<WorkerExit>>>,
    last_exits: Mutex<HashMap<WorkerKey, WorkerExit>>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    /// Called by a worker thread on exit
    fn deregister(&self, key: WorkerKey, generation: u64, exit: &WorkerExit) {
        {
            let mut table = lock(&self.table);
            if table.running.get(&key).map(|h| h.generation) == Some(generation) {
                table.running.remove(&key);
                debug!(worker = %key, generation, "Worker deregistered");
            }
            table.publish_gauge();
        }
        lock(&self.last_exits).insert(key, exit.clone());
    }

    /// Drop a reservation whose source failed to open
    fn release(&self, key: WorkerKey, generation: u64) {
        let mut table = lock(&self.table);
        if table.opening.get(&key) == Some(&generation) {
            table.opening.remove(&key);
        }
    }

    fn retire(&self, thread: JoinHandle<WorkerExit>) {
        let mut stopping = lock(&self.stopping);
        stopping.retain(|t| !t.is_finished());
        stopping.push(thread);
    }
}

/// Registry of running analysis workers
pub struct WorkerRegistry {
    inner: Arc<Inner>,
}

impl WorkerRegistry {
    pub fn new(
        detector: Arc<dyn Detector>,
        tracker: Arc<DebounceTracker>,
        sink: Arc<dyn TransitionSink>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx: WorkerContext {
                    detector,
                    tracker,
                    sink,
                    config,
                },
                table: Mutex::new(Table::default()),
                stopping: Mutex::new(Vec::new()),
                last_exits: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Start a worker for `(camera_id, scenarios)` reading from `source`.
    ///
    /// Returns once the thread is spawned. A key that is already running
    /// (or still opening its source) is left alone and reported as
    /// `AlreadyRunning`. A scenario set overlapping another worker on the
    /// same camera is rejected.
    pub fn start<S>(&self, camera_id: CameraId, scenarios: ScenarioSet, mut source: S) -> Result<StartOutcome, AnalysisError>
    where
        S: FrameSource + 'static,
    {
        if scenarios.is_empty() {
            return Err(TrackerError::EmptyScenarioSet.into());
        }

        let key = WorkerKey::new(camera_id, scenarios);
        let generation = {
            let mut table = lock(&self.inner.table);
            if self.inner.shutting_down.load(Ordering::Acquire) {
                return Err(AnalysisError::ShuttingDown);
            }
            if table.holds(&key) {
                info!(worker = %key, "Analysis already running");
                return Ok(StartOutcome::AlreadyRunning(key));
            }
            if let Some(running) = table.overlapping(&key) {
                warn!(worker = %key, conflicting = %running, "Scenario set overlaps a running worker");
                return Err(AnalysisError::ScenarioConflict { requested: key, running });
            }
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            table.opening.insert(key, generation);
            generation
        };

        let description = source.describe();
        if let Err(e) = source.open() {
            self.inner.release(key, generation);
            warn!(worker = %key, source = %description, "Failed to open source: {}", e);
            return Err(AnalysisError::SourceUnavailable {
                source_name: description,
                reason: e.to_string(),
            });
        }

        let mut table = lock(&self.inner.table);
        // A stop may have withdrawn the reservation, and a newer start may
        // hold the key by now
        if table.opening.get(&key) != Some(&generation) {
            drop(table);
            info!(worker = %key, source = %description, "Start withdrawn while the source was opening");
            return Err(if self.inner.shutting_down.load(Ordering::Acquire) {
                AnalysisError::ShuttingDown
            } else {
                AnalysisError::StartCancelled(key)
            });
        }
        table.opening.remove(&key);

        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(WorkerStats::default());

        let worker = Worker::new(
            key,
            source,
            self.inner.ctx.clone(),
            Arc::clone(&stop),
            Arc::clone(&stats),
        );
        let registry: Weak<Inner> = Arc::downgrade(&self.inner);
        let running_flag = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name(format!("analysis-{}-{}", camera_id, generation))
            .spawn(move || {
                let exit = worker.run();
                running_flag.store(false, Ordering::Release);
                if let Some(registry) = registry.upgrade() {
                    registry.deregister(key, generation, &exit);
                }
                exit
            })
            .map_err(|e| AnalysisError::Spawn(e.to_string()))?;

        table.running.insert(
            key,
            WorkerHandle {
                generation,
                stop,
                running,
                thread,
                source: description.clone(),
                started_at: Utc::now(),
                stats,
            },
        );
        table.publish_gauge();
        drop(table);

        info!(worker = %key, generation, source = %description, "Analysis started");
        Ok(StartOutcome::Started(key))
    }

    /// Signal the worker for `(camera_id, scenarios)` to stop. The key is no
    /// longer listed once this returns.
    pub fn stop(&self, camera_id: CameraId, scenarios: ScenarioSet) -> StopOutcome {
        let key = WorkerKey::new(camera_id, scenarios);
        let (removed, was_opening) = {
            let mut table = lock(&self.inner.table);
            let removed = table.running.remove(&key);
            let was_opening = removed.is_none() && table.opening.remove(&key).is_some();
            table.publish_gauge();
            (removed, was_opening)
        };

        match removed {
            Some(handle) => {
                handle.stop.store(true, Ordering::Release);
                info!(worker = %key, generation = handle.generation, "Analysis stop requested");
                self.inner.retire(handle.thread);
                StopOutcome::Stopping(key)
            }
            None if was_opening => {
                info!(worker = %key, "Analysis stop requested while the source was opening");
                StopOutcome::Stopping(key)
            }
            None => {
                info!(worker = %key, "Analysis not running");
                StopOutcome::NotRunning(key)
            }
        }
    }

    /// Keys of registered workers
    pub fn running(&self) -> Vec<WorkerKey> {
        lock(&self.inner.table).running.keys().copied().collect()
    }

    pub fn is_running(&self, key: &WorkerKey) -> bool {
        lock(&self.inner.table).running.contains_key(key)
    }

    /// Details of registered workers, ordered by camera
    pub fn workers(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = lock(&self.inner.table)
            .running
            .iter()
            .map(|(key, handle)| WorkerInfo {
                key: *key,
                generation: handle.generation,
                source: handle.source.clone(),
                started_at: handle.started_at,
                running: handle.running.load(Ordering::Acquire),
                stats: handle.stats.snapshot(),
            })
            .collect();
        infos.sort_by_key(|info| (info.key.camera_id, info.key.scenarios));
        infos
    }

    /// How the most recent worker for `key` ended
    pub fn last_exit(&self, key: &WorkerKey) -> Option<WorkerExit> {
        lock(&self.inner.last_exits).get(key).cloned()
    }

    /// Stop every worker and join all threads. Blocks until they exit.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);

        let mut threads: Vec<(String, JoinHandle<WorkerExit>)> = {
            let mut table = lock(&self.inner.table);
            table.opening.clear();
            table
                .running
                .drain()
                .map(|(key, handle)| {
                    handle.stop.store(true, Ordering::Release);
                    (key.to_string(), handle.thread)
                })
                .collect()
        };
        threads.extend(
            lock(&self.inner.stopping)
                .drain(..)
                .map(|t| ("stopping worker".to_string(), t)),
        );
        metrics::gauge!("workers_running").set(0.0);

        info!("Joining {} analysis worker thread(s)", threads.len());
        for (name, thread) in threads {
            match thread.join() {
                Ok(exit) => debug!("{} joined: {}", name, exit),
                Err(_) => error!("{} panicked", name),
            }
        }
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        // Threads are detached, not joined, on drop
        for handle in lock(&self.inner.table).running.values() {
            handle.stop.store(true, Ordering::Release);
        }
    }
}
