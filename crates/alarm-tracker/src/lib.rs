//! Alarm State Tracking
//!
//! Converts the raw per-frame verdict of each (camera, scenario) pair into a
//! confirmed alarm state using asymmetric hysteresis windows, and reports the
//! confirmed transitions.

mod config;
mod tracker;
mod types;

pub use config::DebounceConfig;
pub use tracker::{AlarmCaseState, DebounceTracker, TransitionOutcome};
pub use types::{AlarmId, CameraId, ChangeType, Scenario, ScenarioSet, SourceKey};

use thiserror::Error;

/// Tracker errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Unknown scenario code: {0}")]
    UnknownScenario(u8),
    #[error("Invalid analysis mode {0} (expected 1-4)")]
    InvalidAnalysisMode(u8),
    #[error("Scenario set is empty")]
    EmptyScenarioSet,
    #[error("Invalid debounce window {field}: {value_ms}ms exceeds {max_ms}ms")]
    WindowTooLong {
        field: &'static str,
        value_ms: u64,
        max_ms: u64,
    },
}
