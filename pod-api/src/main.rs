use anyhow::{Context, Result};
use pod_api::{create_app, AppState, Config};
use pod_orchestrator::db::{backup_database, create_pool, run_migrations};
use pod_orchestrator::{DockerEngine, WorkspaceOrchestrator};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = pod_logging::init_subscriber();

    info!("Starting pod-api service...");

    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}, storage_root={}, sync_backend={:?}",
        config.bind_addr,
        config.db_path.display(),
        config.storage_root.display(),
        config.sync_backend
    );

    // Backup before migrations
    if let Some(backup_path) = backup_database(&config.db_path)? {
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(&config.db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    std::fs::create_dir_all(&config.storage_root).with_context(|| {
        format!(
            "Failed to create workspace storage root {}",
            config.storage_root.display()
        )
    })?;

    let engine = DockerEngine::connect()
        .await
        .context("Docker daemon is not reachable")?;

    let paths = config.path_sandbox();
    let sync = config.synchronizer(paths.clone());
    let orchestrator = Arc::new(
        WorkspaceOrchestrator::new(
            pool,
            Arc::new(engine),
            sync,
            paths,
            config.container_settings(),
        )
        .with_sync_policy(config.sync_failure_policy),
    );

    // Containers outlive the process; pick them back up
    match orchestrator.reconcile().await {
        Ok(count) => info!("Adopted {} running workspace containers", count),
        Err(e) => warn!("Startup reconciliation failed: {}", e),
    }

    let state = AppState::new(orchestrator, config.terminal_settings());
    let app = create_app(state, config.frontend_url.as_deref())?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
