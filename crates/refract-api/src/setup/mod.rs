//! Application setup and initialization

pub mod routes;
pub mod server;

use crate::state::AppState;
use anyhow::{Context, Result};
use refract_core::Config;
use refract_processing::{
    HttpSourceFetcher, TokioProcessRunner, TransformConfig, TransformationOrchestrator,
};
use refract_storage::create_storage;
use std::sync::Arc;
use std::time::Duration;

/// Build the orchestrator and its collaborators, then the router.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    config.validate().context("Configuration validation failed")?;

    crate::telemetry::init_telemetry(config.is_production())
        .context("Failed to initialize telemetry")?;

    tracing::info!(
        environment = %config.environment(),
        storage_backend = %config.storage_backend(),
        "Configuration loaded and validated successfully"
    );

    tokio::fs::create_dir_all(config.tmp_dir())
        .await
        .with_context(|| format!("Failed to create TMP_DIR {}", config.tmp_dir().display()))?;

    let storage = create_storage(&config)
        .await
        .context("Failed to initialize artifact storage")?;

    let fetcher = HttpSourceFetcher::new(
        Duration::from_secs(config.source_fetch_timeout_secs()),
        config.max_source_size_bytes(),
        config.allow_private_sources(),
    )
    .context("Failed to build source fetcher")?;

    let orchestrator = TransformationOrchestrator::new(
        TransformConfig::from_config(&config),
        storage.clone(),
        Arc::new(fetcher),
        Arc::new(TokioProcessRunner::new()),
    );

    let state = Arc::new(AppState::new(
        Arc::new(orchestrator),
        storage,
        config.header_cache_days(),
        config.is_production(),
    ));
    let router = routes::setup_routes(state.clone());

    Ok((state, router))
}
