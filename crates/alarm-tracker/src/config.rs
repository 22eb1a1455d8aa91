//! Debounce configuration

use crate::TrackerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on either window; anything longer is treated as a typo
const MAX_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Asymmetric hysteresis windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Sustained violation required before an alarm opens (default: 2000ms)
    pub normal_to_violation_ms: u64,
    /// Sustained clear signal required before an alarm closes (default: 3000ms)
    pub violation_to_normal_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            normal_to_violation_ms: 2000,
            violation_to_normal_ms: 3000,
        }
    }
}

impl DebounceConfig {
    /// Build from durations
    pub fn new(normal_to_violation: Duration, violation_to_normal: Duration) -> Self {
        Self {
            normal_to_violation_ms: normal_to_violation.as_millis() as u64,
            violation_to_normal_ms: violation_to_normal.as_millis() as u64,
        }
    }

    /// Both windows zero: every divergent reading confirmed on the next sample
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn normal_to_violation(&self) -> Duration {
        Duration::from_millis(self.normal_to_violation_ms)
    }

    pub fn violation_to_normal(&self) -> Duration {
        Duration::from_millis(self.violation_to_normal_ms)
    }

    /// Zero is accepted (instant transitions); windows over an hour are not.
    pub fn validate(&self) -> Result<(), TrackerError> {
        for (field, value_ms) in [
            ("normal_to_violation_ms", self.normal_to_violation_ms),
            ("violation_to_normal_ms", self.violation_to_normal_ms),
        ] {
            if value_ms > MAX_WINDOW_MS {
                return Err(TrackerError::WindowTooLong {
                    field,
                    value_ms,
                    max_ms: MAX_WINDOW_MS,
                });
            }
        }
        Ok(())
    }
}
