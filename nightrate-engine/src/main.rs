//! nightrate-engine - hybrid nightly pricing service
//!
//! Runs the hourly auto-pricing scheduler and serves `/health`. With
//! `--property` it prices a single property once and exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nightrate_common::config::{
    load_or_default, locate_config_file, RootFolderInitializer, RootFolderResolver,
};
use nightrate_common::events::{EventBus, PricingEvent};
use nightrate_engine::demand::bridge::{BridgeConfig, DemandBridge};
use nightrate_engine::llm::{HttpChatProvider, LlmSettings};
use nightrate_engine::models::{GenerateOptions, Trigger, DEFAULT_HORIZON_DAYS};
use nightrate_engine::workflow::AutoPricingScheduler;
use nightrate_engine::{AppState, PricingEngine};

#[derive(Parser, Debug)]
#[command(name = "nightrate-engine")]
#[command(about = "Hybrid nightly pricing engine for short-term rentals")]
#[command(version)]
struct Args {
    /// Folder holding the database and model artifacts
    #[arg(long, env = "NIGHTRATE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Explicit TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP port for the health endpoint
    #[arg(long)]
    port: Option<u16>,

    /// Run a single scheduler tick and exit
    #[arg(long)]
    once: bool,

    /// Price this property on demand and exit
    #[arg(long)]
    property: Option<String>,

    /// Reprice even if already priced today (with --property)
    #[arg(long, requires = "property")]
    force: bool,

    /// Horizon in days (with --property)
    #[arg(long, default_value_t = DEFAULT_HORIZON_DAYS, requires = "property")]
    horizon: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = locate_config_file(args.config.as_deref());
    let toml_config = load_or_default(config_path.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level)),
        )
        .init();

    info!(
        "Starting nightrate-engine v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let root_folder = RootFolderResolver::new(args.root_folder.clone(), Some(&toml_config)).resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = nightrate_common::db::init_database(&db_path).await?;

    let event_bus = EventBus::new(256);
    spawn_event_logger(&event_bus);

    let bridge_config = BridgeConfig::from_toml(&toml_config.demand_worker, &initializer.models_path());
    info!(
        command = %bridge_config.command.display(),
        "Demand worker configured (spawned on first use)"
    );
    let bridge = DemandBridge::spawn(bridge_config);

    let mut engine = PricingEngine::new(pool.clone(), event_bus.clone()).with_oracle(Arc::new(bridge));

    match nightrate_engine::config::resolve_llm_api_key(&pool, &toml_config).await? {
        Some(key) => {
            let settings = LlmSettings::from_config(&toml_config.llm, key);
            info!(vendor = %settings.vendor, model = %settings.model, "LLM adjustment enabled");
            let provider = HttpChatProvider::new(settings)?;
            engine = engine.with_llm(Arc::new(provider));
        }
        None => info!("LLM adjustment disabled"),
    }
    let engine = Arc::new(engine);

    if let Some(property_id) = &args.property {
        let options = GenerateOptions {
            force: args.force,
            horizon_days: args.horizon,
            trigger: Trigger::OnDemand,
            triggered_by: Some("cli".to_string()),
        };
        let result = engine.generate_calendar(property_id, &options).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let scheduler = Arc::new(AutoPricingScheduler::new(
        Arc::clone(&engine),
        toml_config.scheduler.concurrency,
    ));
    let shutdown = CancellationToken::new();

    if args.once {
        let report = scheduler.run_tick(&shutdown).await;
        info!(?report, "Single tick complete");
        return Ok(());
    }

    let scheduler_task = if toml_config.scheduler.enabled {
        Some(tokio::spawn(Arc::clone(&scheduler).run_forever(shutdown.clone())))
    } else {
        warn!("Auto-pricing scheduler disabled by configuration");
        None
    };

    let state = AppState::new(pool).with_last_error(scheduler.last_error_handle());
    let app = nightrate_engine::build_router(state);

    let port = args.port.unwrap_or(toml_config.http.port);
    let addr = format!("{}:{}", toml_config.http.bind, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            signal_token.cancel();
        })
        .await?;

    // Let in-flight runs settle their quota before the runtime goes away
    if let Some(task) = scheduler_task {
        shutdown.cancel();
        if let Err(e) = task.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }

    Ok(())
}

/// Log pricing events; PMS adapters subscribe to the same bus
fn spawn_event_logger(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PricingEvent::CalendarPublished { property_id, prices, .. }) => {
                    info!(property_id = %property_id, rows = prices.len(), "Calendar published");
                }
                Ok(PricingEvent::ModelRetrained { property_id, model_version, val_rmse, .. }) => {
                    info!(property_id = %property_id, model_version, val_rmse, "Model retrained");
                }
                Ok(event) => tracing::debug!(event_type = event.event_type(), "Pricing event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event logger lagged, {} events dropped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
