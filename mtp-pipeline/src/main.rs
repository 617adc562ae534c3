//! mtp-pipeline - Meeting transcript analysis service
//!
//! Accepts transcripts over HTTP, runs the staged analyzer pipeline in the
//! background and streams progress over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mtp_common::config::{resolve_root_folder, TomlConfig};
use mtp_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mtp_pipeline::db::{self, SqliteContextStore, SqliteJobStore};
use mtp_pipeline::services::{
    ModelFamily, OpenAiCompatibleClient, PipelineOrchestrator, PipelineSettings, TemplateRegistry,
    TokenCounter,
};
use mtp_pipeline::AppState;

const DEFAULT_LOG_FILTER: &str = "mtp_pipeline=debug,mtp_common=info,tower_http=info";

/// Command-line arguments for mtp-pipeline
#[derive(Parser, Debug)]
#[command(name = "mtp-pipeline")]
#[command(about = "Staged LLM analysis of meeting transcripts")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "MTP_PORT")]
    port: Option<u16>,

    /// Root folder holding the database and prompt templates
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Explicit config file path
    #[arg(short, long, env = "MTP_CONFIG")]
    config: Option<PathBuf>,

    /// API key for the completion endpoint (overrides config file)
    #[arg(long, env = "MTP_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(key) = args.llm_api_key.clone() {
        config.llm.api_key = Some(key);
    }

    init_tracing(&config)?;

    info!("Starting mtp-pipeline (Meeting Transcript Pipeline)");
    info!(
        "Version: {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let root_folder =
        resolve_root_folder(args.root_folder.as_deref(), "MTP_ROOT_FOLDER", Some(&config));
    std::fs::create_dir_all(&root_folder).with_context(|| {
        format!("Failed to create root folder {}", root_folder.display())
    })?;
    info!("Root folder: {}", root_folder.display());

    let db_path = config.database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let pool = db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let job_store = Arc::new(SqliteJobStore::new(pool.clone()));
    let context_store = Arc::new(SqliteContextStore::new(pool));

    let interrupted = db::cleanup_stale_jobs(&job_store)
        .await
        .context("Failed to clean up interrupted jobs")?;
    if interrupted > 0 {
        warn!(count = interrupted, "Marked jobs from a previous run as failed");
    }

    let prompts_path = config.prompts_path(&root_folder);
    let templates = if prompts_path.is_dir() {
        TemplateRegistry::load_dir(&prompts_path)
            .with_context(|| format!("Failed to load prompts from {}", prompts_path.display()))?
    } else {
        info!(
            "No prompts directory at {}, using built-in templates",
            prompts_path.display()
        );
        TemplateRegistry::with_builtin_defaults()
    };

    let family: ModelFamily = config
        .pipeline
        .model_family
        .parse()
        .map_err(anyhow::Error::msg)
        .context("Invalid pipeline.model_family")?;

    let completion =
        OpenAiCompatibleClient::new(&config.llm).context("Failed to build completion client")?;
    info!(
        base_url = %config.llm.base_url,
        model = %config.llm.default_model,
        "Completion client ready"
    );

    let event_bus = EventBus::new(256);
    let orchestrator = Arc::new(
        PipelineOrchestrator::new(
            job_store.clone(),
            context_store.clone(),
            event_bus.clone(),
            Arc::new(completion),
            Arc::new(templates),
            PipelineSettings::from_config(&config),
        )
        .with_token_counter(TokenCounter::new(family)),
    );

    let state = AppState::new(job_store, context_store, event_bus, orchestrator);
    let app = mtp_pipeline::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port.unwrap_or(config.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// stderr logging, plus a plain-text file layer when `[logging] file` is set
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if config.logging.level.trim().is_empty() {
                EnvFilter::try_new(DEFAULT_LOG_FILTER)
            } else {
                EnvFilter::try_new(format!("{},{}", config.logging.level, DEFAULT_LOG_FILTER))
            }
        })
        .context("Invalid log filter")?;

    let file_layer = match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
