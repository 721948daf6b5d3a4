//! ADS deploy worker
//!
//! Runs every pipeline stage in one process over the in-process bus, plus
//! the HTTP status view.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ads_deploy_pipeline::api::{self, AppState};
use ads_deploy_pipeline::bus::{InMemoryBus, MessageBus};
use ads_deploy_pipeline::config::Config;
use ads_deploy_pipeline::db;
use ads_deploy_pipeline::executioner::ShellExecutioner;
use ads_deploy_pipeline::service::{HealthRegistry, StatusFeed};
use ads_deploy_pipeline::worker::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;
    info!(
        "Starting ADS deploy worker: worker_id={}, exchange={}",
        config.worker_id, config.topology.exchange
    );
    let config = Arc::new(config);

    info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(config.topology.exchange.clone()));
    let executioner = Arc::new(ShellExecutioner::new(config.virtualenv.clone()));
    let health = Arc::new(HealthRegistry::new(config.poll_interval));
    let feed = Arc::new(StatusFeed::default());

    let pipeline = Pipeline::new(
        Arc::clone(&config),
        Arc::clone(&bus),
        executioner,
        pool.clone(),
        Arc::clone(&health),
        Arc::clone(&feed),
    );
    let handle = pipeline
        .start()
        .await
        .context("Failed to start pipeline")?;

    let app = api::create_router(AppState {
        pool,
        bus,
        config: Arc::clone(&config),
        health,
        feed,
    });

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    handle.shutdown().await;
    Ok(())
}
