//! Pipeline server binary
//!
//! Run with: cargo run -p paper-pipeline --bin paper-pipeline-server -- --config pipeline.toml

use clap::Parser;
use paper_pipeline::{config::PipelineConfig, server::PipelineServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "paper-pipeline-server", version, about = "PDF extraction and analysis pipeline")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Leave interrupted records untouched at startup
    #[arg(long)]
    no_recovery: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paper_pipeline=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("  - Working dir: {}", config.storage.working_dir.display());
    tracing::info!("  - MinerU: {} (model {})", config.mineru.base_url, config.mineru.model_version);
    tracing::info!("  - Analysis: {} (model {})", config.analysis.base_url, config.analysis.model);
    tracing::info!(
        "  - Polling: every {} ms, at most {} attempts",
        config.processing.poll_interval_ms,
        config.processing.max_poll_attempts
    );

    let server = PipelineServer::new(config)?;

    if !cli.no_recovery {
        let report = server.state().pipeline().recover_interrupted()?;
        if !report.failed.is_empty() {
            tracing::warn!("Could not recover: {}", report.failed.join(", "));
        }
    }

    tracing::info!("Health: http://{}/health", server.address());
    server.start().await?;

    Ok(())
}
