//! nightrate-demand-worker - demand model worker process
//!
//! Spawned by the engine's demand bridge. Speaks one JSON request/response per
//! line over stdin/stdout; stdout carries nothing else, logs go to stderr.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nightrate_engine::demand::worker::{serve, ModelRegistry};

#[derive(Parser, Debug)]
#[command(name = "nightrate-demand-worker")]
#[command(about = "Demand model training and inference worker")]
#[command(version)]
struct Args {
    /// Directory holding one model artifact per property
    #[arg(long, env = "NIGHTRATE_MODELS_DIR")]
    models_dir: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.models_dir)?;
    info!(models_dir = %args.models_dir.display(), "Demand worker ready");

    let mut registry = ModelRegistry::new(args.models_dir);
    serve(
        &mut registry,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    info!("Input closed, demand worker exiting");
    Ok(())
}
