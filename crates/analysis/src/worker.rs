//! Analysis worker loop
//!
//! One worker runs on its own OS thread and owns one frame source. Per
//! frame it checks the stop flag, acquires a frame, runs the detector for
//! every scenario it covers, feeds the verdicts into the tracker and hands
//! confirmed transitions to the lifecycle coordinator without waiting.

use crate::config::{AnalysisConfig, DetectorFailurePolicy};
use crate::detector::{Detection, Detector};
use crate::registry::WorkerKey;
use alarm_lifecycle::{LifecycleCoordinator, LifecycleError, TransitionResult};
use alarm_tracker::{ChangeType, DebounceTracker, SourceKey};
use camera_capture::{FrameSource, SourceKind, VideoFrame};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Granularity of interruptible sleeps during reconnect backoff
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Receiver of confirmed transitions. Must never block the caller.
pub trait TransitionSink: Send + Sync {
    fn try_submit(&self, transition: TransitionResult) -> Result<(), LifecycleError>;
}

impl TransitionSink for LifecycleCoordinator {
    fn try_submit(&self, transition: TransitionResult) -> Result<(), LifecycleError> {
        LifecycleCoordinator::try_submit(self, transition)
    }
}

/// Why a worker loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum WorkerExit {
    /// Stop flag observed
    Stopped,
    /// Finite source reached its end
    SourceExhausted,
    /// Source failed and retries were exhausted (or it is a file source)
    SourceUnavailable(String),
    /// Detector failed under [`DetectorFailurePolicy::StopWorker`]
    DetectorFailure(String),
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Stopped => write!(f, "stopped"),
            WorkerExit::SourceExhausted => write!(f, "source exhausted"),
            WorkerExit::SourceUnavailable(reason) => write!(f, "source unavailable: {}", reason),
            WorkerExit::DetectorFailure(reason) => write!(f, "detector failure: {}", reason),
        }
    }
}

/// Per-worker counters
#[derive(Debug, Default)]
pub struct WorkerStats {
    frames: AtomicU64,
    detector_failures: AtomicU64,
    transitions: AtomicU64,
    dropped_transitions: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub frames: u64,
    pub detector_failures: u64,
    pub transitions: u64,
    pub dropped_transitions: u64,
    pub reconnects: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            dropped_transitions: self.dropped_transitions.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Everything a worker thread needs besides its source
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub detector: Arc<dyn Detector>,
    pub tracker: Arc<DebounceTracker>,
    pub sink: Arc<dyn TransitionSink>,
    pub config: AnalysisConfig,
}

pub(crate) struct Worker<S> {
    key: WorkerKey,
    source: S,
    ctx: WorkerContext,
    stop: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    frame_count: u32,
}

impl<S: FrameSource> Worker<S> {
    pub fn new(
        key: WorkerKey,
        source: S,
        ctx: WorkerContext,
        stop: Arc<AtomicBool>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            key,
            source,
            ctx,
            stop,
            stats,
            frame_count: 0,
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Run until stopped or the source gives out
    pub fn run(mut self) -> WorkerExit {
        info!(worker = %self.key, source = %self.source.describe(), "Analysis worker started");
        let stride = self.ctx.config.frame_stride.max(1);

        let exit = loop {
            if self.stop_requested() {
                break WorkerExit::Stopped;
            }

            let frame = match self.next_frame() {
                Ok(frame) => frame,
                Err(exit) => break exit,
            };

            self.advance_frame_count();
            if self.frame_count % stride != 0 {
                continue;
            }

            if let Err(exit) = self.process(&frame) {
                break exit;
            }
        };

        match &exit {
            WorkerExit::Stopped | WorkerExit::SourceExhausted => {
                info!(worker = %self.key, frames = self.frame_count, "Analysis worker exited: {}", exit)
            }
            _ => error!(worker = %self.key, frames = self.frame_count, "Analysis worker exited: {}", exit),
        }
        exit
    }

    fn advance_frame_count(&mut self) {
        if self.frame_count >= i32::MAX as u32 {
            debug!(worker = %self.key, "Frame counter wrapped");
            self.frame_count = 0;
        } else {
            self.frame_count += 1;
        }
    }

    /// Read one frame, reconnecting streams with backoff
    fn next_frame(&mut self) -> Result<VideoFrame, WorkerExit> {
        let kind = self.source.kind();
        let retry = self.ctx.config.retry;
        let mut failures = 0u32;

        loop {
            let mut reason = match self.source.next_frame() {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) if kind == SourceKind::File => return Err(WorkerExit::SourceExhausted),
                Ok(None) => "stream ended".to_string(),
                Err(e) if kind == SourceKind::File => return Err(WorkerExit::SourceUnavailable(e.to_string())),
                Err(e) => e.to_string(),
            };

            loop {
                failures += 1;
                if failures > retry.max_retries {
                    return Err(WorkerExit::SourceUnavailable(reason));
                }

                let delay = retry.delay(failures);
                warn!(
                    worker = %self.key,
                    attempt = failures,
                    max_retries = retry.max_retries,
                    "Stream read failed ({}), reconnecting in {:?}",
                    reason,
                    delay
                );
                if !self.pause(delay) {
                    return Err(WorkerExit::Stopped);
                }

                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                match self.source.open() {
                    Ok(()) => break,
                    Err(e) => reason = e.to_string(),
                }
            }
        }
    }

    /// Sleep for `delay`, waking early on stop. Returns false if stopped.
    fn pause(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn process(&mut self, frame: &VideoFrame) -> Result<(), WorkerExit> {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("analysis_frames_total").increment(1);

        let verdicts = self.ctx.detector.detect_all(frame, self.key.scenarios);
        let now = Utc::now();

        for (scenario, verdict) in verdicts {
            let detection = match verdict {
                Ok(detection) => detection,
                Err(e) => {
                    self.stats.detector_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("detector_failures_total").increment(1);
                    match self.ctx.config.detector_failure {
                        DetectorFailurePolicy::TreatAsClear => {
                            warn!(worker = %self.key, %scenario, "Detector failed, treating frame as clear: {}", e);
                            Detection::clear()
                        }
                        DetectorFailurePolicy::StopWorker => {
                            return Err(WorkerExit::DetectorFailure(e.to_string()));
                        }
                    }
                }
            };

            let key = SourceKey::new(self.key.camera_id, scenario);
            let outcome = self.ctx.tracker.update(key, detection.detected, now);
            let Some(change_type) = outcome.change_type.filter(|_| outcome.state_changed) else {
                continue;
            };

            let annotated_images = match change_type {
                ChangeType::NormalToViolation => detection.annotated_images,
                ChangeType::ViolationToNormal => Vec::new(),
            };
            let transition = TransitionResult {
                change_type,
                camera_id: self.key.camera_id,
                scenario,
                alarm_id: outcome.bound_alarm_id,
                episode: outcome.episode,
                occurred_at: now,
                annotated_images,
            };

            self.stats.transitions.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("alarm_transitions_total", "direction" => change_type.as_str()).increment(1);
            info!(%key, frame = self.frame_count, "Confirmed {} transition", change_type.as_str());

            if let Err(e) = self.ctx.sink.try_submit(transition) {
                self.stats.dropped_transitions.fetch_add(1, Ordering::Relaxed);
                warn!(%key, "Transition not handed over: {}", e);
            }
        }
        Ok(())
    }
}
