//! Analysis configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a worker does when the detector fails on a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorFailurePolicy {
    /// Count the frame as "not detected" and keep going
    #[default]
    TreatAsClear,
    /// Terminate the worker
    StopWorker,
}

/// Reconnect policy for network streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before the worker gives up
    pub max_retries: u32,
    /// First backoff delay (milliseconds), doubled per attempt
    pub backoff_base_ms: u64,
    /// Backoff ceiling (milliseconds)
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms))
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Stream reconnect policy
    pub retry: RetryPolicy,
    /// Detector failure handling
    pub detector_failure: DetectorFailurePolicy,
    /// Analyse every Nth frame (default: 1, every frame)
    pub frame_stride: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            detector_failure: DetectorFailurePolicy::default(),
            frame_stride: 1,
        }
    }
}
