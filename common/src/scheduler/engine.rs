// Tokio-based live scheduler engine

use crate::errors::SchedulerError;
use crate::schedule::{next_fire_time, parse_cron_expression};
use crate::scheduler::handler::{FireContext, JobHandler};
use crate::scheduler::live::{
    FirePolicy, JobKey, JobSpec, LiveScheduler, MisfirePolicy, TriggerKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

/// Live scheduler built on tokio tasks.
///
/// Every scheduled trigger runs its own timer task: compute the next fire
/// time, sleep interruptibly, fire. A global semaphore bounds concurrent
/// handler executions and a per-job-key mutex serializes firings of the
/// same key, which callers rely on for their cache and registration
/// invariants.
pub struct TokioScheduler {
    started: AtomicBool,
    registry: Mutex<HashMap<JobKey, RegisteredJob>>,
    /// Serialization locks survive re-registration so that a replacement
    /// job never fires concurrently with an in-flight execution of its
    /// predecessor under the same key.
    serials: Mutex<HashMap<JobKey, Arc<Mutex<()>>>>,
    permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

struct RegisteredJob {
    spec: JobSpec,
    cancel_tx: watch::Sender<bool>,
    triggers: HashMap<TriggerKey, JoinHandle<()>>,
}

impl TokioScheduler {
    /// Create a scheduler allowing at most `max_concurrent_executions`
    /// handler executions at the same time
    pub fn new(max_concurrent_executions: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            started: AtomicBool::new(false),
            registry: Mutex::new(HashMap::new()),
            serials: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent_executions)),
            shutdown_tx,
        }
    }

    async fn serial_for(&self, job_key: &JobKey) -> Arc<Mutex<()>> {
        let mut serials = self.serials.lock().await;
        serials.entry(job_key.clone()).or_default().clone()
    }
}

/// One handler execution: bounded by the global permit pool, serialized
/// per job key. Escaped handler errors are logged and never unwind the
/// scheduler.
async fn fire(
    handler: Arc<dyn JobHandler>,
    payload: HashMap<String, String>,
    job_key: JobKey,
    trigger_key: TriggerKey,
    serial: Arc<Mutex<()>>,
    permits: Arc<Semaphore>,
) {
    let Ok(_permit) = permits.acquire().await else {
        // Semaphore closed: the scheduler is shutting down
        return;
    };
    let _serialized = serial.lock().await;

    let ctx = FireContext {
        job_key: job_key.clone(),
        trigger_key: trigger_key.clone(),
        payload,
        fired_at: Utc::now(),
    };

    debug!(job_key = %job_key, trigger_key = %trigger_key, "Firing job handler");

    if let Err(e) = handler.execute(ctx).await {
        error!(
            job_key = %job_key,
            trigger_key = %trigger_key,
            error = %e,
            "Job handler execution failed"
        );
    }
}

#[async_trait]
impl LiveScheduler for TokioScheduler {
    async fn start(&self) -> Result<(), SchedulerError> {
        self.started.store(true, Ordering::SeqCst);
        info!("Live scheduler started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn shutdown(&self, drain: bool) -> Result<(), SchedulerError> {
        info!(drain, "Shutting down live scheduler");
        self.started.store(false, Ordering::SeqCst);

        // Wake every trigger task out of its sleep and refuse new firings
        let _ = self.shutdown_tx.send(true);
        self.permits.close();

        let mut registry = self.registry.lock().await;
        for (job_key, job) in registry.drain() {
            for (trigger_key, handle) in job.triggers {
                if drain {
                    if let Err(e) = handle.await {
                        if !e.is_cancelled() {
                            error!(
                                job_key = %job_key,
                                trigger_key = %trigger_key,
                                error = %e,
                                "Trigger task ended abnormally during drain"
                            );
                        }
                    }
                } else {
                    handle.abort();
                }
            }
        }

        info!("Live scheduler stopped");
        Ok(())
    }

    async fn exists(&self, job_key: &JobKey) -> bool {
        self.registry.lock().await.contains_key(job_key)
    }

    #[instrument(skip(self, spec), fields(job_key = %job_key))]
    async fn register_job(
        &self,
        job_key: JobKey,
        spec: JobSpec,
        replace_existing: bool,
    ) -> Result<(), SchedulerError> {
        let mut registry = self.registry.lock().await;

        if let Some(existing) = registry.get(&job_key) {
            if !replace_existing {
                return Err(SchedulerError::DuplicateJobKey(job_key.to_string()));
            }
            // Stop the predecessor's triggers; in-flight executions run to
            // completion and stay serialized against the replacement via
            // the shared per-key lock.
            let _ = existing.cancel_tx.send(true);
        }

        let (cancel_tx, _) = watch::channel(false);
        registry.insert(
            job_key.clone(),
            RegisteredJob {
                spec,
                cancel_tx,
                triggers: HashMap::new(),
            },
        );

        debug!("Job registered");
        Ok(())
    }

    #[instrument(skip(self), fields(job_key = %job_key, trigger_key = %trigger_key))]
    async fn schedule_trigger(
        &self,
        trigger_key: TriggerKey,
        job_key: JobKey,
        policy: FirePolicy,
        misfire: MisfirePolicy,
        timezone: Tz,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        let serial = self.serial_for(&job_key).await;
        let permits = self.permits.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let mut registry = self.registry.lock().await;
        let job = registry
            .get_mut(&job_key)
            .ok_or_else(|| SchedulerError::JobNotRegistered(job_key.to_string()))?;

        let handler = job.spec.handler.clone();
        let payload = job.spec.payload.clone();
        let mut cancel_rx = job.cancel_tx.subscribe();

        let (first_fire, task): (Option<DateTime<Utc>>, JoinHandle<()>) = match policy {
            FirePolicy::Immediate => {
                let fire_job_key = job_key.clone();
                let fire_trigger_key = trigger_key.clone();
                let task = tokio::spawn(async move {
                    fire(
                        handler,
                        payload,
                        fire_job_key,
                        fire_trigger_key,
                        serial,
                        permits,
                    )
                    .await;
                });
                (None, task)
            }
            FirePolicy::Cron(ref expression) => {
                let schedule = parse_cron_expression(expression)?;
                let first_fire = next_fire_time(&schedule, Utc::now(), timezone);
                if first_fire.is_none() {
                    // Expression never fires again; nothing to schedule
                    return Ok(None);
                }

                let fire_job_key = job_key.clone();
                let fire_trigger_key = trigger_key.clone();
                let MisfirePolicy::FireOnceAndProceed = misfire;

                let task = tokio::spawn(async move {
                    // Computing the next fire from "now" after every
                    // execution realizes FireOnceAndProceed: any number of
                    // missed windows collapses into a single recovery fire.
                    let mut from = Utc::now();
                    loop {
                        let Some(next) = next_fire_time(&schedule, from, timezone) else {
                            break;
                        };

                        let now = Utc::now();
                        if next > now {
                            let delay = (next - now).to_std().unwrap_or_default();
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown_rx.changed() => break,
                                _ = cancel_rx.changed() => break,
                            }
                        }

                        fire(
                            handler.clone(),
                            payload.clone(),
                            fire_job_key.clone(),
                            fire_trigger_key.clone(),
                            serial.clone(),
                            permits.clone(),
                        )
                        .await;

                        from = Utc::now();
                    }
                });
                (first_fire, task)
            }
        };

        job.triggers.insert(trigger_key, task);
        Ok(first_fire)
    }

    #[instrument(skip(self), fields(job_key = %job_key))]
    async fn unregister_job(&self, job_key: &JobKey) -> Result<bool, SchedulerError> {
        let mut registry = self.registry.lock().await;

        match registry.remove(job_key) {
            Some(job) => {
                // Trigger tasks exit at their next wakeup; an in-flight
                // execution runs to completion.
                let _ = job.cancel_tx.send(true);
                debug!("Job unregistered");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
