//! Safety Analysis
//!
//! Runs one analysis worker per (camera, scenario set):
//! - pulls frames from the camera's [`FrameSource`](camera_capture::FrameSource)
//! - asks the [`Detector`] for a verdict per scenario
//! - debounces verdicts through the shared tracker
//! - hands confirmed transitions to the lifecycle coordinator
//!
//! [`SafetyMonitor`] owns every moving part and is the control surface the
//! API layer talks to.

pub mod config;
pub mod detector;
pub mod monitor;
pub mod registry;
mod worker;

pub use config::{AnalysisConfig, DetectorFailurePolicy, RetryPolicy};
pub use detector::{Detection, Detector, NoopDetector, ObjectCounter, ObjectCounts, RuleDetector};
pub use monitor::{MonitorSettings, MonitorStats, SafetyMonitor};
pub use registry::{StartOutcome, StopOutcome, WorkerInfo, WorkerKey, WorkerRegistry};
pub use worker::{TransitionSink, WorkerExit, WorkerStats, WorkerStatsSnapshot};

use alarm_tracker::TrackerError;
use thiserror::Error;

/// Detector errors
#[derive(Debug, Clone, Error)]
pub enum DetectorError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Frame rejected: {0}")]
    InvalidFrame(String),
}

/// Analysis errors surfaced to callers of the control surface
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),
    #[error("Invalid configuration: {0}")]
    Config(#[from] TrackerError),
    #[error("{requested} overlaps the scenarios of running worker {running}")]
    ScenarioConflict { requested: WorkerKey, running: WorkerKey },
    #[error("Start of {0} was cancelled by a stop request")]
    StartCancelled(WorkerKey),
    #[error("Monitor is shutting down")]
    ShuttingDown,
}
