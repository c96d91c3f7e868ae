use std::sync::Arc;

use ambulance_dispatch::api;
use ambulance_dispatch::config::{Config, LogFormat};
use ambulance_dispatch::engine::scheduler;
use ambulance_dispatch::error::AppError;
use ambulance_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let (app_state, task_rx) = AppState::new(&config);
    let shared_state = Arc::new(app_state);

    if let Some(path) = &config.snapshot_path {
        shared_state.store.load_snapshot(path).await?;
    }

    let engine = tokio::spawn(scheduler::run_dispatch_engine(
        shared_state.clone(),
        task_rx,
        config.dispatch_workers,
    ));
    scheduler::recover_dispatch_tasks(&shared_state).await?;

    let snapshots = config.snapshot_path.clone().map(|path| {
        let state = shared_state.clone();
        let every = config.snapshot_interval;
        tokio::spawn(async move { state.store.save_periodically(&path, every).await })
    });

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shared_state.begin_shutdown();
    if let Err(err) = engine.await {
        tracing::error!(error = %err, "dispatch engine task failed");
    }

    if let Some(snapshots) = snapshots {
        snapshots.abort();
    }
    if let Some(path) = &config.snapshot_path {
        shared_state.store.save_snapshot(path).await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
