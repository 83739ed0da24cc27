// Orchestrator run loop: startup sequencing, periodic reconciliation,
// graceful shutdown

use crate::reconcile::ReconciliationEngine;
use anyhow::Context;
use common::queue::{Broker, Destination};
use common::scheduler::{
    FirePolicy, JobHandler, JobKey, JobSpec, LiveScheduler, MisfirePolicy, TriggerKey,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Job key under which the product refresh batch job is registered
pub const REFRESH_JOB_KEY: &str = "product-refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Static description of everything the loop needs besides its
/// collaborators
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Seconds between reconciliation passes
    pub reconcile_interval: Duration,
    /// Cron expression for the product refresh batch job
    pub refresh_cron: String,
    /// Destination the refresh requests are published to
    pub refresh_queue: String,
    /// Extra dispatch destinations declared at startup
    pub dispatch_destinations: Vec<String>,
}

/// Drives the whole background process: start the scheduler, declare the
/// broker topology, register the refresh batch job, then reconcile the
/// job catalog every interval until told to stop.
///
/// The inter-pass wait is interruptible, so shutdown latency is bounded
/// by an in-flight pass, not by the interval.
pub struct Orchestrator {
    config: OrchestratorConfig,
    scheduler: Arc<dyn LiveScheduler>,
    broker: Arc<dyn Broker>,
    engine: ReconciliationEngine,
    refresh_handler: Arc<dyn JobHandler>,
    state: LifecycleState,
    shutdown_tx: watch::Sender<bool>,
}

/// Cloneable handle used to request a graceful stop
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        scheduler: Arc<dyn LiveScheduler>,
        broker: Arc<dyn Broker>,
        engine: ReconciliationEngine,
        refresh_handler: Arc<dyn JobHandler>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            scheduler,
            broker,
            engine,
            refresh_handler,
            state: LifecycleState::Created,
            shutdown_tx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run until a shutdown is requested. Startup failures (scheduler,
    /// broker topology, refresh job registration) are fatal.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("Orchestrator is starting");

        self.scheduler
            .start()
            .await
            .context("Failed to start the live scheduler")?;

        self.broker
            .configure_destinations(&self.destinations())
            .await
            .context("Failed to configure broker destinations")?;

        self.register_refresh_job()
            .await
            .context("Failed to register the product refresh job")?;

        self.state = LifecycleState::Running;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if let Err(e) = self.engine.reconcile().await {
                // A failed snapshot read skips this pass; the next one
                // starts from the store again
                error!(error = %e, "Reconciliation pass failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconcile_interval) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        self.state = LifecycleState::Stopping;
        info!("Orchestrator is stopping");

        self.scheduler
            .shutdown(true)
            .await
            .context("Live scheduler shutdown failed")?;

        self.state = LifecycleState::Stopped;
        info!("Orchestrator stopped");
        Ok(())
    }

    /// The static destination topology: the refresh queue plus any
    /// configured dispatch queues
    fn destinations(&self) -> Vec<Destination> {
        let mut destinations = vec![Destination::new(self.config.refresh_queue.clone())];
        destinations.extend(
            self.config
                .dispatch_destinations
                .iter()
                .map(Destination::new),
        );
        destinations
    }

    /// The refresh batch job runs on its own schedule, independent of the
    /// job catalog; the scheduler's per-key serialization keeps its
    /// executions from overlapping.
    async fn register_refresh_job(&self) -> anyhow::Result<()> {
        let job_key = JobKey::new(REFRESH_JOB_KEY);

        self.scheduler
            .register_job(job_key.clone(), JobSpec::new(self.refresh_handler.clone()), false)
            .await?;

        let next_fire_time = self
            .scheduler
            .schedule_trigger(
                TriggerKey::new(format!("{REFRESH_JOB_KEY}-cron")),
                job_key,
                FirePolicy::Cron(self.config.refresh_cron.clone()),
                MisfirePolicy::FireOnceAndProceed,
                chrono_tz::UTC,
            )
            .await?;

        info!(
            cron = %self.config.refresh_cron,
            next_fire_time = ?next_fire_time,
            "Product refresh job registered"
        );
        Ok(())
    }
}
