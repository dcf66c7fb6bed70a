use std::sync::Arc;

use anyhow::Context;
use conveyor_server::api::{self, AppState};
use conveyor_server::config::{Config, StorageBackend};
use conveyor_server::db;
use conveyor_server::hub::Hub;
use conveyor_server::repository::{MemoryRepository, PgRepository, Repository};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor server...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let hub = Hub::spawn(config.hub_config());

    match config.storage {
        StorageBackend::Postgres => {
            info!("Connecting to database...");

            let pool = db::connect_with_retry(
                &config.database_url,
                config.db_max_connections,
                config.db_connect_attempts,
            )
            .await
            .context("Failed to create database pool")?;

            info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            serve(Arc::new(PgRepository::new(pool)), hub, &config).await
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage, all data is lost on shutdown");
            serve(Arc::new(MemoryRepository::new()), hub, &config).await
        }
    }
}

async fn serve<R: Repository>(repo: Arc<R>, hub: Hub, config: &Config) -> anyhow::Result<()> {
    let state = AppState::new(repo, hub.clone(), config);

    if let Some(period) = config.sweep_interval {
        info!("Progress sweep every {:?}", period);

        let tasks = state.tasks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = tasks.sweep_progress(chrono::Utc::now()).await {
                    error!("Progress sweep failed: {}", e);
                }
            }
        });
    }

    // Build router with all API endpoints
    let app = api::create_router(state, &config.cors_origin)?;

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    match hub.flush().await {
        Ok(observers) => info!("Hub drained, {} observer(s) still connected", observers),
        Err(e) => warn!("Hub flush failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
