//! stemdeck-sep - Stem Separation Microservice
//!
//! Splits uploaded or downloaded songs into stems by running separation
//! modules in dependency order, streams job progress over SSE and mixes
//! selected stems back together.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stemdeck_common::config::{self, RootFolderInitializer, RootFolderResolver};
use stemdeck_common::events::ProgressBus;
use tokio::signal;
use tracing::info;

use stemdeck_sep::services::{CommandEngine, HttpFetcher, ModuleRegistry, Pipeline, ProjectStore};
use stemdeck_sep::AppState;

const SERVICE_NAME: &str = "stemdeck-sep";

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "stemdeck-sep")]
#[command(about = "Stem separation microservice for StemDeck")]
#[command(version)]
struct Args {
    /// Root folder holding the project library
    #[arg(short, long, env = "STEMDECK_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "STEMDECK_SEP_PORT")]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(long, env = "STEMDECK_SEP_HOST")]
    host: Option<String>,

    /// TOML config file
    #[arg(short, long, env = "STEMDECK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| config::default_config_path(SERVICE_NAME));
    let toml_config = config::load_or_default(config_path.as_deref());

    config::init_tracing(&toml_config.logging).context("Failed to initialize logging")?;

    info!(
        "Starting stemdeck-sep (Stem Separation) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    // Step 1: Resolve root folder
    let root_folder = RootFolderResolver::new(SERVICE_NAME)
        .with_cli_override(args.root_folder)
        .with_toml_config(&toml_config)
        .resolve();

    // Step 2: Create library/ and uploads/ if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    let uploads_dir = initializer.uploads_path();
    stemdeck_sep::clean_stale_uploads(&uploads_dir).context("Failed to clean uploads folder")?;

    // Step 3: Load the project library
    let store = Arc::new(
        ProjectStore::open(initializer.library_path())
            .await
            .context("Failed to open project library")?,
    );
    info!("Project library: {}", store.library_path().display());

    let registry = Arc::new(ModuleRegistry::builtin().context("Invalid module catalog")?);
    info!("Module registry: {} modules", registry.list().len());

    let bus = ProgressBus::new(toml_config.pipeline.bus_config());

    let engine = CommandEngine::new(
        toml_config.engine.command.clone(),
        toml_config.engine.output_format.clone(),
    )
    .with_model_dir(toml_config.engine.model_dir.clone());
    info!("Separation engine: {}", toml_config.engine.command);

    let fetcher = HttpFetcher::new().context("Failed to create HTTP client")?;

    let pipeline = Arc::new(Pipeline::new(
        registry.clone(),
        store.clone(),
        bus.clone(),
        Arc::new(engine),
        Arc::new(fetcher),
        uploads_dir.clone(),
        &toml_config.pipeline,
    ));

    let state = AppState::new(registry, store, bus, pipeline, uploads_dir);
    let app = stemdeck_sep::build_router(state);

    // Start server
    let host = args.host.unwrap_or(toml_config.host);
    let port = args.port.unwrap_or(toml_config.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stemdeck-sep stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
