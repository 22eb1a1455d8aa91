//! Site Safety Monitor - Main Entry Point
//!
//! Usage: `safety-monitor [CONFIG_FILE]`. Without a file, `config/default.*`
//! is read if present; `SAFETY__*` environment variables override both.

use anyhow::Context;
use api::{init_logging, run_server, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_file = std::env::args().nth(1);
    let settings = Settings::load(config_file.as_deref()).context("Failed to load settings")?;
    init_logging(&settings.logging)?;

    info!("=== Site Safety Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Debounce windows: normal->violation {}ms, violation->normal {}ms",
        settings.debounce.normal_to_violation_ms, settings.debounce.violation_to_normal_ms
    );

    run_server(settings).await
}
