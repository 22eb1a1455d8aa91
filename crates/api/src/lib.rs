//! Site Safety API Server
//!
//! Control surface of the safety monitor: start/stop analysis, worker and
//! alarm listings, health, and a WebSocket feed of alarm events.

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower_governor::GovernorLayer;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod settings;
pub mod source;

pub use error::{ApiError, ApiResponse};
pub use rate_limit::RateLimitConfig;
pub use settings::{LoggingSettings, Settings, StorageBackend, StorageSettings};
pub use source::SourceSpec;

use alarm_lifecycle::FileSnapshotStore;
use analysis::{NoopDetector, SafetyMonitor};
use storage::{AlarmRepository, AlarmStore, SqliteAlarmStore};

/// Application state shared across handlers
pub struct AppState {
    pub monitor: Arc<SafetyMonitor>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(monitor: Arc<SafetyMonitor>) -> Self {
        Self {
            monitor,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Create the application router. Snapshots are served from
/// `snapshot_dir` under `/snapshots` when given.
pub fn create_router(
    state: Arc<AppState>,
    rate_limit: &RateLimitConfig,
    snapshot_dir: Option<&Path>,
) -> Result<Router, ApiError> {
    let mut control = Router::new()
        .route("/api/v1/safety_analysis/start", post(routes::analysis::start_analysis))
        .route("/api/v1/safety_analysis/stop", post(routes::analysis::stop_analysis));
    if rate_limit.enabled {
        control = control.layer(GovernorLayer {
            config: rate_limit::create_governor_config(rate_limit)?,
        });
    }

    let mut router = Router::new()
        .route("/api/v1/health", get(routes::health::health))
        .route("/api/v1/safety_analysis/workers", get(routes::analysis::list_workers))
        .route("/api/v1/safety_analysis/ws", get(routes::ws::alarm_feed))
        .route("/api/v1/alarms", get(routes::alarms::list_alarms))
        .merge(control);
    if let Some(dir) = snapshot_dir {
        router = router.nest_service("/snapshots", ServeDir::new(dir));
    }

    Ok(router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state))
}

/// Initialize logging. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .with_context(|| format!("Invalid log filter {:?}", settings.level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}

/// Serve Prometheus metrics on `addr`
pub fn install_metrics(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse().with_context(|| format!("Invalid metrics address {}", addr))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics on {}", addr);
    Ok(())
}

/// Open the configured alarm store
pub async fn open_store(settings: &StorageSettings) -> anyhow::Result<Arc<dyn AlarmStore>> {
    match settings.backend {
        StorageBackend::Memory => Ok(Arc::new(
            AlarmRepository::new().with_retention(settings.memory_retention),
        )),
        StorageBackend::Sqlite => {
            if let Some(parent) = settings
                .url
                .strip_prefix("sqlite://")
                .and_then(|path| Path::new(path).parent())
                .filter(|parent| !parent.as_os_str().is_empty())
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let store = SqliteAlarmStore::connect(&settings.url, settings.max_connections).await?;
            Ok(Arc::new(store))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Run the server until Ctrl-C, then stop all workers and drain alarms
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    if let Some(addr) = &settings.server.metrics_addr {
        install_metrics(addr)?;
    }

    let store = open_store(&settings.storage).await?;
    let snapshots = Arc::new(FileSnapshotStore::new(
        &settings.snapshots.dir,
        settings.snapshots.base_url.clone(),
    )?);
    let monitor = Arc::new(SafetyMonitor::start(
        settings.monitor(),
        Arc::new(NoopDetector::new()),
        store,
        snapshots,
    )?);

    let state = Arc::new(AppState::new(Arc::clone(&monitor)));
    let app = create_router(state, &settings.rate_limit, Some(&settings.snapshots.dir))?;

    let addr = settings.server.bind_addr();
    info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_tracker::DebounceConfig;
    use analysis::MonitorSettings;
    use axum::body::{to_bytes, Body};
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use camera_capture::VideoFrame;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        monitor: Arc<SafetyMonitor>,
        _snapshots: tempfile::TempDir,
    }

    fn harness(rate_limit: RateLimitConfig) -> Harness {
        let snapshots = tempfile::tempdir().unwrap();
        let monitor = Arc::new(
            SafetyMonitor::start(
                MonitorSettings {
                    debounce: DebounceConfig::immediate(),
                    ..Default::default()
                },
                Arc::new(NoopDetector),
                Arc::new(AlarmRepository::new()),
                Arc::new(FileSnapshotStore::new(snapshots.path(), "http://localhost/snapshots").unwrap()),
            )
            .unwrap(),
        );
        let router = create_router(Arc::new(AppState::new(Arc::clone(&monitor))), &rate_limit, None).unwrap();
        Harness {
            router,
            monitor,
            _snapshots: snapshots,
        }
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        request
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn footage() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            VideoFrame::filled(4, 4, [0, 0, i], 0)
                .to_image()
                .unwrap()
                .save(dir.path().join(format!("{:02}.png", i)))
                .unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(RateLimitConfig::disabled());
        let (status, body) = call(&h.router, get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 1);
        assert_eq!(body["data"]["status"], "healthy");
        assert_eq!(body["data"]["monitor"]["workers_running"], 0);
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let h = harness(RateLimitConfig::disabled());
        let footage = footage();
        let start = json!({
            "camera_id": 4,
            "analysis_mode": 3,
            "source": {"kind": "replay", "path": footage.path(), "fps": 50, "loop": true}
        });

        let (status, body) = call(&h.router, post("/api/v1/safety_analysis/start", start.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["msg"], "analysis started");
        assert_eq!(body["data"]["scenarios"], json!(["area_intrusion"]));
        assert_eq!(body["data"]["scenario_codes"], json!([1]));

        let (_, body) = call(&h.router, post("/api/v1/safety_analysis/start", start)).await;
        assert_eq!(body["code"], 1);
        assert_eq!(body["msg"], "analysis already running");

        let (_, body) = call(&h.router, get("/api/v1/safety_analysis/workers")).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["camera_id"], 4);

        let stop = json!({"camera_id": 4, "analysis_mode": 3});
        let (_, body) = call(&h.router, post("/api/v1/safety_analysis/stop", stop.clone())).await;
        assert_eq!(body["msg"], "analysis stopping");
        assert_eq!(body["data"]["running"], false);
        assert!(h.monitor.running().is_empty());

        let (_, body) = call(&h.router, post("/api/v1/safety_analysis/stop", stop)).await;
        assert_eq!(body["msg"], "analysis not running");

        h.monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_failures_use_envelope() {
        let h = harness(RateLimitConfig::disabled());

        let bad_mode = json!({
            "camera_id": 1,
            "analysis_mode": 9,
            "source": {"kind": "directory", "path": "/tmp"}
        });
        let (status, body) = call(&h.router, post("/api/v1/safety_analysis/start", bad_mode)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 0);
        assert!(body["data"].is_null());

        let missing_dir = json!({
            "camera_id": 1,
            "source": {"kind": "directory", "path": "/nonexistent/footage"}
        });
        let (status, body) = call(&h.router, post("/api/v1/safety_analysis/start", missing_dir)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], 0);
        assert!(h.monitor.running().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_start_conflicts() {
        let h = harness(RateLimitConfig::disabled());
        let footage = footage();
        let source = json!({"kind": "replay", "path": footage.path(), "fps": 50, "loop": true});

        let fire = json!({"camera_id": 6, "scenarios": [2], "source": source.clone()});
        let (status, _) = call(&h.router, post("/api/v1/safety_analysis/start", fire)).await;
        assert_eq!(status, StatusCode::OK);

        let all = json!({"camera_id": 6, "analysis_mode": 1, "source": source});
        let (status, body) = call(&h.router, post("/api/v1/safety_analysis/start", all)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 0);
        assert_eq!(h.monitor.running().len(), 1);

        h.monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_alarm_listing_empty() {
        let h = harness(RateLimitConfig::disabled());
        let (status, body) = call(&h.router, get("/api/v1/alarms?camera_id=3&limit=10")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], 0);
        assert_eq!(body["data"]["alarms"], json!([]));
    }

    #[tokio::test]
    async fn test_control_routes_are_rate_limited() {
        let h = harness(RateLimitConfig {
            enabled: true,
            per_second: 60,
            burst_size: 2,
        });
        let stop = json!({"camera_id": 2});

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let (status, _) = call(&h.router, post("/api/v1/safety_analysis/stop", stop.clone())).await;
            statuses.push(status);
        }
        assert_eq!(statuses[..2], [StatusCode::OK, StatusCode::OK]);
        assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);

        // Read-only routes are not limited
        let (status, _) = call(&h.router, get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
    }
}
