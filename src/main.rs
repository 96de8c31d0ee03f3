//! tidebot - headless trading control plane
//!
//! Runs the full pipeline without a UI: streaming ingestion with REST
//! fallback, bar aggregation, staleness guarding, asset selection, signal
//! evaluation, circuit breakers and the campaign scheduler. Metrics are
//! pushed as structured log lines - no HTTP server, no incoming
//! connections.
//!
//! # Usage
//! ```sh
//! MODE=paper cargo run
//! ```
//!
//! # Environment Variables
//! - `MODE` - `paper` (default) or `live`
//! - `EXCHANGE_API_KEY` / `EXCHANGE_API_SECRET` - required for live mode
//! - `REDIS_URL` - hot store (default `redis://127.0.0.1:6379`)
//! - `DATABASE_URL` - durable store (default `sqlite://data/tidebot.db`)
//! - `ENCRYPTION_KEY` - reserved for credential-at-rest handling

use anyhow::Result;
use clap::Parser;
use tidebot::application::system::Application;
use tidebot::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "tidebot", about = "Multi-asset crypto trading control plane")]
struct Cli {
    /// Execution mode override (paper|live); falls back to the MODE env var.
    #[arg(long)]
    mode: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if let Some(mode) = cli.mode {
        // Still single-threaded here; the runtime has not been built yet.
        unsafe { std::env::set_var("MODE", mode) };
    }

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("tidebot {} starting...", env!("CARGO_PKG_VERSION"));

    // Fatal config problems exit non-zero before anything spawns.
    let config = Config::from_env()?;
    info!("Configuration loaded: mode={:?}", config.mode);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let app = Application::build(config).await?;
        app.start().await?;
        info!(
            "Trading system running ({} symbols tracked). Press Ctrl+C to shut down.",
            app.tracked_symbols().await.len()
        );

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received.");
        app.stop().await;
        Ok(())
    })
}
