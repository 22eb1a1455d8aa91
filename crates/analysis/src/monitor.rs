//! Safety monitor
//!
//! Owns the tracker, the worker registry, the lifecycle coordinator and
//! the broadcast dispatcher. Built once at process start and shut down on
//! process stop; nothing here is process-global.

use crate::config::AnalysisConfig;
use crate::detector::Detector;
use crate::registry::{StartOutcome, StopOutcome, WorkerInfo, WorkerKey, WorkerRegistry};
use crate::AnalysisError;
use alarm_lifecycle::{LifecycleConfig, LifecycleContext, LifecycleCoordinator, LifecycleStatsSnapshot, SnapshotStore};
use alarm_tracker::{CameraId, DebounceConfig, DebounceTracker, ScenarioSet};
use broadcast::{BroadcastDispatcher, SubscriberId, Subscription};
use camera_capture::FrameSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::AlarmStore;
use tracing::{error, info};

/// Settings of the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub debounce: DebounceConfig,
    pub analysis: AnalysisConfig,
    pub lifecycle: LifecycleConfig,
    /// Events buffered per subscriber before it is dropped
    pub broadcast_buffer: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            debounce: DebounceConfig::default(),
            analysis: AnalysisConfig::default(),
            lifecycle: LifecycleConfig::default(),
            broadcast_buffer: 64,
        }
    }
}

/// Monitor-wide counters for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub workers_running: usize,
    pub tracked_sources: usize,
    pub active_violations: usize,
    pub subscribers: usize,
    pub lifecycle: LifecycleStatsSnapshot,
}

pub struct SafetyMonitor {
    tracker: Arc<DebounceTracker>,
    registry: Arc<WorkerRegistry>,
    coordinator: Arc<LifecycleCoordinator>,
    dispatcher: Arc<BroadcastDispatcher>,
    store: Arc<dyn AlarmStore>,
}

impl SafetyMonitor {
    /// Build the pipeline. Must be called from within a tokio runtime.
    pub fn start(
        settings: MonitorSettings,
        detector: Arc<dyn Detector>,
        store: Arc<dyn AlarmStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self, AnalysisError> {
        settings.debounce.validate()?;

        let tracker = Arc::new(DebounceTracker::new(settings.debounce));
        let dispatcher = Arc::new(BroadcastDispatcher::new(settings.broadcast_buffer));
        let coordinator = Arc::new(LifecycleCoordinator::start(
            settings.lifecycle,
            LifecycleContext {
                tracker: Arc::clone(&tracker),
                store: Arc::clone(&store),
                snapshots,
                dispatcher: Arc::clone(&dispatcher),
            },
        ));
        let registry = Arc::new(WorkerRegistry::new(
            detector,
            Arc::clone(&tracker),
            coordinator.clone(),
            settings.analysis,
        ));

        info!("Safety monitor started");
        Ok(Self {
            tracker,
            registry,
            coordinator,
            dispatcher,
            store,
        })
    }

    /// Start analysing `camera_id` for `scenarios`
    pub fn start_analysis<S>(
        &self,
        camera_id: CameraId,
        scenarios: ScenarioSet,
        source: S,
    ) -> Result<StartOutcome, AnalysisError>
    where
        S: FrameSource + 'static,
    {
        self.registry.start(camera_id, scenarios, source)
    }

    pub fn stop_analysis(&self, camera_id: CameraId, scenarios: ScenarioSet) -> StopOutcome {
        self.registry.stop(camera_id, scenarios)
    }

    pub fn running(&self) -> Vec<WorkerKey> {
        self.registry.running()
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.registry.workers()
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &DebounceTracker {
        &self.tracker
    }

    /// Subscribe to alarm open/close events
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.connect()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.dispatcher.disconnect(id)
    }

    pub fn store(&self) -> &Arc<dyn AlarmStore> {
        &self.store
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            workers_running: self.registry.running().len(),
            tracked_sources: self.tracker.len(),
            active_violations: self.tracker.active_keys().len(),
            subscribers: self.dispatcher.subscriber_count(),
            lifecycle: self.coordinator.stats(),
        }
    }

    /// Stop and join all workers, then drain pending alarm side effects
    pub async fn shutdown(&self) {
        info!("Shutting down safety monitor");
        let registry = Arc::clone(&self.registry);
        if let Err(e) = tokio::task::spawn_blocking(move || registry.shutdown()).await {
            error!("Worker shutdown failed: {}", e);
        }
        self.coordinator.shutdown().await;
        info!("Safety monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Detection, NoopDetector};
    use crate::worker::WorkerExit;
    use crate::DetectorError;
    use alarm_lifecycle::SnapshotError;
    use alarm_tracker::{Scenario, TrackerError};
    use async_trait::async_trait;
    use broadcast::EventKind;
    use camera_capture::{ReplaySource, VideoFrame};
    use std::time::Duration;
    use storage::AlarmRepository;

    struct UrlSnapshots;

    #[async_trait]
    impl SnapshotStore for UrlSnapshots {
        async fn upload(&self, image: &VideoFrame, camera_id: CameraId) -> Result<String, SnapshotError> {
            Ok(format!("http://snapshots/{}_{}.jpg", camera_id, image.sequence))
        }
    }

    /// Detects a violation on frames with a red channel
    struct RedDetector;

    impl Detector for RedDetector {
        fn detect(&self, frame: &VideoFrame, _scenario: Scenario) -> Result<Detection, DetectorError> {
            let detected = frame.data[0] > 0;
            Ok(Detection {
                detected,
                annotated_images: if detected { vec![frame.clone()] } else { Vec::new() },
            })
        }
    }

    fn monitor(detector: Arc<dyn Detector>, store: Arc<AlarmRepository>) -> SafetyMonitor {
        let settings = MonitorSettings {
            debounce: DebounceConfig::immediate(),
            ..Default::default()
        };
        SafetyMonitor::start(settings, detector, store, Arc::new(UrlSnapshots)).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_violation_opens_and_closes_alarm() {
        let store = Arc::new(AlarmRepository::new());
        let monitor = monitor(Arc::new(RedDetector), Arc::clone(&store));
        let mut events = monitor.subscribe();

        let red = VideoFrame::filled(4, 4, [255, 0, 0], 0);
        let clear = VideoFrame::filled(4, 4, [0, 0, 0], 0);
        let clip = ReplaySource::once("gate", vec![red.clone(), red, clear.clone(), clear]);
        let outcome = monitor
            .start_analysis(CameraId(12), ScenarioSet::single(Scenario::AreaIntrusion), clip)
            .unwrap();
        assert!(matches!(outcome, StartOutcome::Started(_)));

        let opened = tokio::time::timeout(Duration::from_secs(5), events.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(opened.kind, EventKind::Opened);
        assert_eq!(opened.camera_id, CameraId(12));
        assert_eq!(opened.snapshot_urls.len(), 1);

        let closed = tokio::time::timeout(Duration::from_secs(5), events.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.kind, EventKind::Closed);
        assert_eq!(closed.alarm_id, opened.alarm_id);

        monitor.shutdown().await;
        let alarms = store.list_alarms(Some(CameraId(12)), 10).await.unwrap();
        assert_eq!(alarms.len(), 1);
        assert!(alarms[0].is_closed());
        // The close may overtake the bind; either path closes the alarm once
        let stats = monitor.stats();
        assert_eq!(stats.lifecycle.opened, 1);
        assert_eq!(stats.lifecycle.closed + stats.lifecycle.orphans_closed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_then_immediate_start() {
        let monitor = monitor(Arc::new(NoopDetector), Arc::new(AlarmRepository::new()));
        let scenarios = ScenarioSet::all();
        let feed = || {
            ReplaySource::looping("yard", vec![VideoFrame::filled(2, 2, [0, 0, 0], 0)])
                .with_interval(Duration::from_millis(10))
        };

        monitor.start_analysis(CameraId(3), scenarios, feed()).unwrap();
        let key = WorkerKey::new(CameraId(3), scenarios);
        assert_eq!(monitor.stop_analysis(CameraId(3), scenarios), StopOutcome::Stopping(key));
        assert!(monitor.running().is_empty());

        let restarted = monitor.start_analysis(CameraId(3), scenarios, feed()).unwrap();
        assert_eq!(restarted, StartOutcome::Started(key));
        assert_eq!(monitor.running(), vec![key]);

        monitor.shutdown().await;
        assert!(monitor.running().is_empty());
        assert_eq!(monitor.registry().last_exit(&key), Some(WorkerExit::Stopped));
    }

    #[tokio::test]
    async fn test_rejects_overlong_debounce() {
        let settings = MonitorSettings {
            debounce: DebounceConfig::new(Duration::from_secs(7200), Duration::from_secs(3)),
            ..Default::default()
        };
        let result = SafetyMonitor::start(
            settings,
            Arc::new(NoopDetector),
            Arc::new(AlarmRepository::new()),
            Arc::new(UrlSnapshots),
        );
        assert!(matches!(
            result,
            Err(AnalysisError::Config(TrackerError::WindowTooLong { .. }))
        ));
    }
}
