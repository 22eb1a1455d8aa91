//! Service settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file, then `SAFETY__<SECTION>__<KEY>` environment variables
//! (e.g. `SAFETY__DEBOUNCE__NORMAL_TO_VIOLATION_MS=1500`).

use crate::rate_limit::RateLimitConfig;
use alarm_lifecycle::LifecycleConfig;
use alarm_tracker::DebounceConfig;
use analysis::{AnalysisConfig, MonitorSettings};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "config/default";
const ENV_PREFIX: &str = "SAFETY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Prometheus scrape endpoint, disabled when unset
    pub metrics_addr: Option<String>,
    /// Events buffered per WebSocket client before it is dropped
    pub broadcast_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics_addr: Some("0.0.0.0:9090".to_string()),
            broadcast_buffer: 64,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Directory annotated alarm images are written to
    pub dir: PathBuf,
    /// Public prefix of snapshot URLs; the directory is served under `/snapshots`
    pub base_url: String,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/snapshots"),
            base_url: "http://localhost:8080/snapshots".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
    /// Records kept by the in-memory backend
    pub memory_retention: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            url: "sqlite://data/alarms.db".to_string(),
            max_connections: 5,
            memory_retention: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human readable text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub debounce: DebounceConfig,
    pub analysis: AnalysisConfig,
    pub lifecycle: LifecycleConfig,
    pub snapshots: SnapshotSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
    pub rate_limit: RateLimitConfig,
}

impl Settings {
    /// Load settings from `file` (or `config/default.*` if present) and the
    /// environment
    pub fn load(file: Option<&str>) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Settings of the analysis pipeline
    pub fn monitor(&self) -> MonitorSettings {
        MonitorSettings {
            debounce: self.debounce,
            analysis: self.analysis.clone(),
            lifecycle: self.lifecycle.clone(),
            broadcast_buffer: self.server.broadcast_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_without_sources() {
        let settings: Settings = Config::builder().build().unwrap().try_deserialize().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.debounce.normal_to_violation(), Duration::from_secs(2));
        assert_eq!(settings.debounce.violation_to_normal(), Duration::from_secs(3));
        assert_eq!(settings.storage.backend, StorageBackend::Sqlite);
        assert_eq!(settings.monitor().broadcast_buffer, 64);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9000

[debounce]
normal_to_violation_ms = 500

[analysis]
frame_stride = 3
detector_failure = "stop_worker"

[storage]
backend = "memory"
"#,
        )
        .unwrap();

        let settings = Settings::load(path.to_str()).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.debounce.normal_to_violation(), Duration::from_millis(500));
        assert_eq!(settings.debounce.violation_to_normal(), Duration::from_secs(3));
        assert_eq!(settings.analysis.frame_stride, 3);
        assert_eq!(settings.analysis.detector_failure, analysis::DetectorFailurePolicy::StopWorker);
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some("/nonexistent/safety.toml")).is_err());
    }
}
