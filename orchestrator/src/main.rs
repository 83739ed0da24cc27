// Orchestrator binary entry point

use common::config::Settings;
use common::db::repositories::{PgJobRepository, PgProductRepository};
use common::db::DbPool;
use common::queue::{Broker, NatsBroker, NatsClient};
use common::scheduler::{LiveScheduler, TokioScheduler};
use orchestrator::dispatch::DispatchHandler;
use orchestrator::orchestrator::{Orchestrator, OrchestratorConfig};
use orchestrator::reconcile::ReconciliationEngine;
use orchestrator::refresh::ProductRefreshProcessor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Structured logging with JSON format
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchestrator=info,common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting product refresh orchestrator");

    let settings = Settings::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    info!(
        nats_url = %settings.nats.url,
        reconcile_interval_seconds = settings.scheduler.reconcile_interval_seconds,
        trigger_mode = ?settings.scheduler.trigger_mode,
        "Configuration loaded"
    );

    // Database pool and schema migrations; a migration failure is fatal
    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        e
    })?;
    db_pool.run_migrations().await.map_err(|e| {
        error!(error = %e, "Failed to apply database migrations");
        e
    })?;

    // NATS JetStream broker
    let nats_client = NatsClient::new(&settings.nats).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        e
    })?;
    let broker =
        Arc::new(NatsBroker::new(nats_client, &settings.nats)) as Arc<dyn Broker>;
    info!("Message broker initialized");

    // Repositories
    let jobs = Arc::new(PgJobRepository::new(db_pool.clone()));
    let products = Arc::new(PgProductRepository::new(db_pool.clone()));

    // Live scheduler and the two job handlers it will fire
    let scheduler = Arc::new(TokioScheduler::new(
        settings.scheduler.max_concurrent_executions,
    )) as Arc<dyn LiveScheduler>;

    let dispatch_handler = Arc::new(DispatchHandler::new(broker.clone()));
    let refresh_handler = Arc::new(ProductRefreshProcessor::new(
        products,
        broker.clone(),
        settings.refresh.queue.clone(),
    ));

    let engine = ReconciliationEngine::new(
        jobs,
        scheduler.clone(),
        dispatch_handler,
        settings.scheduler.trigger_mode,
    );

    let mut orchestrator = Orchestrator::new(
        OrchestratorConfig {
            reconcile_interval: Duration::from_secs(settings.scheduler.reconcile_interval_seconds),
            refresh_cron: settings.refresh.cron.clone(),
            refresh_queue: settings.refresh.queue.clone(),
            dispatch_destinations: settings.nats.destinations.clone(),
        },
        scheduler,
        broker,
        engine,
        refresh_handler,
    );

    // Graceful shutdown on Ctrl+C / SIGTERM
    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received shutdown signal, stopping orchestrator");
        shutdown.shutdown();
    });

    let result = orchestrator.run().await;
    db_pool.close().await;

    if let Err(e) = result {
        error!(error = %e, "Orchestrator exited with error");
        return Err(e.into());
    }

    info!("Orchestrator exited");
    Ok(())
}
