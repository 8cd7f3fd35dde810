//! Bias-scoring API server binary.
//!
//! Loads configuration, opens the SQLite store, wires the ensemble
//! transport/caches/progress tracker into a `ScoreManager`, and serves the
//! REST API over HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use biasscore_core::cache::{ArticleCache, ResponseCache};
use biasscore_core::config::{Config, EnsembleConfig};
use biasscore_core::llm::Transport;
use biasscore_core::progress::ProgressTracker;
use biasscore_core::score_manager::ScoreManager;
use biasscore_core::storage;
use biasscore_server::state::AppState;

/// Bias-scoring API server — serves the ensemble scoring REST API.
#[derive(Parser)]
#[command(name = "biasscore-server", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Host address to bind to. Use 0.0.0.0 for LAN access.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Path to the biasscore configuration file.
    #[arg(long, default_value = "~/.biasscore/config.toml")]
    config: String,

    /// Path to the ensemble configuration file. Defaults to the value in
    /// `config.ensemble_config_path` when omitted.
    #[arg(long)]
    ensemble_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_and_validate(Some(&cli.config)).map_err(|errs| {
        anyhow::anyhow!(
            "invalid configuration: {}",
            errs.iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        )
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .init();

    tracing::info!(
        db = %config.storage.db_path,
        host = %cli.host,
        port = cli.port,
        "starting biasscore server"
    );

    let pool = storage::init_db(&config.storage.db_path).await?;

    let ensemble_config_path = cli
        .ensemble_config
        .clone()
        .unwrap_or_else(|| config.ensemble_config_path.clone());
    let ensemble_config = EnsembleConfig::load(&ensemble_config_path)?;
    ensemble_config.validate()?;

    let transport = Transport::new(config.llm.clone());
    let response_cache = ResponseCache::new();
    let article_cache = ArticleCache::new(Duration::from_secs(
        config.runtime.article_cache_ttl_seconds,
    ));
    let progress = ProgressTracker::new(Duration::from_secs(config.runtime.progress_ttl_seconds));

    let shutdown = CancellationToken::new();
    tokio::spawn(
        progress
            .clone()
            .run_sweeper(Duration::from_secs(60), shutdown.clone()),
    );

    let score_manager = ScoreManager::new(
        pool.clone(),
        transport,
        response_cache.clone(),
        article_cache.clone(),
        progress.clone(),
        Duration::from_secs(config.runtime.job_timeout_seconds),
    );

    let state = Arc::new(AppState {
        db: pool,
        score_manager,
        progress,
        article_cache,
        response_cache,
        ensemble_config: tokio::sync::RwLock::new(ensemble_config),
        in_flight: tokio::sync::Mutex::new(std::collections::HashSet::new()),
        auto_analyse_disabled: config.auto_analyse_disabled,
    });

    let router = biasscore_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", cli.host, cli.port)).await?;
    tracing::info!("listening on http://{}:{}", cli.host, cli.port);
    axum::serve(listener, router).await?;

    shutdown.cancel();
    Ok(())
}
