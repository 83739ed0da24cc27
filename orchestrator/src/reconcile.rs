// Reconciliation engine: diff persisted job definitions against the
// last-applied snapshot and mutate the live scheduler accordingly

use common::config::TriggerMode;
use common::db::repositories::JobStore;
use common::models::{Job, JobStatus, TriggerStatus};
use common::schedule::is_valid_cron_expression;
use common::scheduler::{
    FirePolicy, JobHandler, JobKey, JobSpec, LiveScheduler, MisfirePolicy, TriggerKey,
    JOB_QUEUE_KEY,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Keeps the live scheduler synchronized with the job catalog.
///
/// The engine owns the map of last-applied job snapshots. It is
/// process-local and starts empty on every boot, so a restart re-schedules
/// everything from the store. `reconcile` must never run concurrently with
/// itself; the orchestrator loop calls it strictly sequentially.
pub struct ReconciliationEngine {
    jobs: Arc<dyn JobStore>,
    scheduler: Arc<dyn LiveScheduler>,
    dispatch_handler: Arc<dyn JobHandler>,
    trigger_mode: TriggerMode,
    cache: HashMap<Uuid, Job>,
}

impl ReconciliationEngine {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        scheduler: Arc<dyn LiveScheduler>,
        dispatch_handler: Arc<dyn JobHandler>,
        trigger_mode: TriggerMode,
    ) -> Self {
        Self {
            jobs,
            scheduler,
            dispatch_handler,
            trigger_mode,
            cache: HashMap::new(),
        }
    }

    /// One reconciliation pass: load the store snapshot, then apply
    /// created jobs, replaced jobs, and removals, in that order.
    ///
    /// A scheduling or validation problem on one job never aborts the
    /// remaining jobs of the same pass; only a failed snapshot read does.
    #[instrument(skip(self))]
    pub async fn reconcile(&mut self) -> Result<(), common::errors::DatabaseError> {
        let snapshot = self.jobs.load_schedulable_jobs().await?;

        self.schedule_created(&snapshot).await;
        self.reschedule_updated(&snapshot).await;
        self.delete_removed(&snapshot).await;

        Ok(())
    }

    async fn schedule_created(&mut self, snapshot: &[Job]) {
        let created: Vec<Job> = snapshot
            .iter()
            .filter(|job| !self.cache.contains_key(&job.id))
            .cloned()
            .collect();

        for job in created {
            self.schedule_job(job).await;
        }
    }

    async fn reschedule_updated(&mut self, snapshot: &[Job]) {
        let updated: Vec<Job> = snapshot
            .iter()
            .filter(|job| {
                self.cache
                    .get(&job.id)
                    .is_some_and(|cached| cached != *job)
            })
            .cloned()
            .collect();

        for job in updated {
            let job_id = job.id;
            self.delete_job(job_id, true).await;
            self.schedule_job(job).await;
            info!(job_id = %job_id, "Rescheduled job");
        }
    }

    async fn delete_removed(&mut self, snapshot: &[Job]) {
        let removed: Vec<Uuid> = self
            .cache
            .keys()
            .filter(|id| snapshot.iter().all(|job| job.id != **id))
            .copied()
            .collect();

        for job_id in removed {
            self.delete_job(job_id, false).await;
        }
    }

    /// Register a job and its valid, enabled triggers with the live
    /// scheduler, then record the applied snapshot in the cache.
    async fn schedule_job(&mut self, job: Job) {
        if job.status != JobStatus::Enabled || job.triggers.is_empty() {
            return;
        }

        let job_key = JobKey::from(job.id);

        // A registration under this key that the cache does not know about
        // means the cache is stale (e.g. two instances, or a partially
        // applied earlier pass). Do not overwrite it; the job is retried
        // on the next pass.
        if self.scheduler.exists(&job_key).await {
            error!(
                job_id = %job.id,
                "Found existing scheduler registration while scheduling; scheduling aborted"
            );
            return;
        }

        info!(job_id = %job.id, "Scheduling job");

        let spec = JobSpec::new(self.dispatch_handler.clone())
            .with_payload(JOB_QUEUE_KEY, job.queue_name.clone());

        if let Err(e) = self.scheduler.register_job(job_key.clone(), spec, true).await {
            error!(job_id = %job.id, error = %e, "Failed to register job");
            return;
        }

        let scheduled_triggers = match self.trigger_mode {
            TriggerMode::Immediate => self.schedule_immediate(&job, &job_key).await,
            TriggerMode::Cron => self.schedule_cron_triggers(&job, &job_key).await,
        };

        // A job that ended up with no live triggers has nothing to fire;
        // keep it out of the scheduler and the cache so the store remains
        // the single source of its fate.
        if scheduled_triggers == 0 {
            let _ = self.scheduler.unregister_job(&job_key).await;
            info!(job_id = %job.id, "Job has no schedulable triggers; not scheduled");
            return;
        }

        self.cache.insert(job.id, job);
    }

    /// Development mode: a single run-once trigger per job
    async fn schedule_immediate(&self, job: &Job, job_key: &JobKey) -> usize {
        let trigger_key = TriggerKey::new(Uuid::nil().to_string());
        match self
            .scheduler
            .schedule_trigger(
                trigger_key,
                job_key.clone(),
                FirePolicy::Immediate,
                MisfirePolicy::FireOnceAndProceed,
                chrono_tz::UTC,
            )
            .await
        {
            Ok(_) => 1,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to schedule immediate trigger");
                0
            }
        }
    }

    /// Production mode: one cron trigger per valid, enabled trigger row.
    /// A trigger with an invalid cron expression is persisted as disabled
    /// and skipped; the job's remaining triggers are unaffected.
    async fn schedule_cron_triggers(&self, job: &Job, job_key: &JobKey) -> usize {
        let mut scheduled = 0;

        for trigger in &job.triggers {
            if !is_valid_cron_expression(&trigger.cron_expression) {
                match self.jobs.disable_trigger(trigger.id).await {
                    Ok(()) => error!(
                        trigger_id = %trigger.id,
                        "Found invalid trigger; trigger was disabled"
                    ),
                    Err(e) => error!(
                        trigger_id = %trigger.id,
                        error = %e,
                        "Found invalid trigger but failed to disable it"
                    ),
                }
                continue;
            }

            if trigger.status == TriggerStatus::Disabled {
                continue;
            }

            match self
                .scheduler
                .schedule_trigger(
                    TriggerKey::from(trigger.id),
                    job_key.clone(),
                    FirePolicy::Cron(trigger.cron_expression.clone()),
                    MisfirePolicy::FireOnceAndProceed,
                    chrono_tz::UTC,
                )
                .await
            {
                Ok(next_fire_time) => {
                    scheduled += 1;
                    info!(
                        trigger_id = %trigger.id,
                        next_fire_time = ?next_fire_time,
                        "Scheduled trigger"
                    );
                }
                Err(e) => {
                    error!(
                        trigger_id = %trigger.id,
                        error = %e,
                        "Failed to schedule trigger"
                    );
                }
            }
        }

        scheduled
    }

    /// Unregister a job and evict it from the cache. Replace-on-update
    /// cycles suppress the deletion log to avoid duplicate noise.
    async fn delete_job(&mut self, job_id: Uuid, rescheduled: bool) {
        let job_key = JobKey::from(job_id);

        if let Err(e) = self.scheduler.unregister_job(&job_key).await {
            error!(job_id = %job_id, error = %e, "Failed to unregister job");
        }

        self.cache.remove(&job_id);

        if !rescheduled {
            info!(job_id = %job_id, "Deleted job");
        }
    }

    /// Number of jobs currently tracked as applied
    pub fn cached_jobs(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use chrono_tz::Tz;
    use common::errors::{DatabaseError, SchedulerError};
    use common::models::Trigger;
    use common::scheduler::FireContext;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Job store mock backed by a swappable snapshot
    struct FakeJobStore {
        snapshot: Mutex<Vec<Job>>,
        disabled_triggers: Mutex<Vec<Uuid>>,
    }

    impl FakeJobStore {
        fn new(snapshot: Vec<Job>) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Mutex::new(snapshot),
                disabled_triggers: Mutex::new(Vec::new()),
            })
        }

        fn set_snapshot(&self, snapshot: Vec<Job>) {
            *self.snapshot.lock().unwrap() = snapshot;
        }

        fn disabled(&self) -> Vec<Uuid> {
            self.disabled_triggers.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobStore for FakeJobStore {
        async fn load_schedulable_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn disable_trigger(&self, trigger_id: Uuid) -> Result<(), DatabaseError> {
            self.disabled_triggers.lock().unwrap().push(trigger_id);
            Ok(())
        }
    }

    /// Live scheduler mock recording every mutation
    #[derive(Default)]
    struct FakeScheduler {
        registered: Mutex<HashSet<String>>,
        register_calls: Mutex<Vec<String>>,
        schedule_calls: Mutex<Vec<(String, String, FirePolicy)>>,
        unregister_calls: Mutex<Vec<String>>,
    }

    impl FakeScheduler {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn mutation_count(&self) -> usize {
            self.register_calls.lock().unwrap().len()
                + self.schedule_calls.lock().unwrap().len()
                + self.unregister_calls.lock().unwrap().len()
        }

        fn registered_keys(&self) -> HashSet<String> {
            self.registered.lock().unwrap().clone()
        }

        fn scheduled_for(&self, job_key: &str) -> Vec<(String, FirePolicy)> {
            self.schedule_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, key, _)| key == job_key)
                .map(|(trigger, _, policy)| (trigger.clone(), policy.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl LiveScheduler for FakeScheduler {
        async fn start(&self) -> Result<(), SchedulerError> {
            Ok(())
        }

        async fn shutdown(&self, _drain: bool) -> Result<(), SchedulerError> {
            Ok(())
        }

        async fn exists(&self, job_key: &JobKey) -> bool {
            self.registered.lock().unwrap().contains(job_key.as_str())
        }

        async fn register_job(
            &self,
            job_key: JobKey,
            _spec: JobSpec,
            replace_existing: bool,
        ) -> Result<(), SchedulerError> {
            let mut registered = self.registered.lock().unwrap();
            if registered.contains(job_key.as_str()) && !replace_existing {
                return Err(SchedulerError::DuplicateJobKey(job_key.to_string()));
            }
            registered.insert(job_key.to_string());
            self.register_calls.lock().unwrap().push(job_key.to_string());
            Ok(())
        }

        async fn schedule_trigger(
            &self,
            trigger_key: TriggerKey,
            job_key: JobKey,
            policy: FirePolicy,
            _misfire: MisfirePolicy,
            _timezone: Tz,
        ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
            self.schedule_calls.lock().unwrap().push((
                trigger_key.to_string(),
                job_key.to_string(),
                policy,
            ));
            Ok(Some(Utc::now()))
        }

        async fn unregister_job(&self, job_key: &JobKey) -> Result<bool, SchedulerError> {
            let existed = self.registered.lock().unwrap().remove(job_key.as_str());
            self.unregister_calls
                .lock()
                .unwrap()
                .push(job_key.to_string());
            Ok(existed)
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn execute(&self, _ctx: FireContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn engine(
        store: Arc<FakeJobStore>,
        scheduler: Arc<FakeScheduler>,
    ) -> ReconciliationEngine {
        ReconciliationEngine::new(store, scheduler, Arc::new(NoopHandler), TriggerMode::Cron)
    }

    fn trigger(job_id: Uuid, cron: &str, status: TriggerStatus) -> Trigger {
        Trigger {
            id: Uuid::new_v4(),
            job_id,
            cron_expression: cron.to_string(),
            status,
        }
    }

    fn job(name: &str, queue: &str, triggers: Vec<Trigger>) -> Job {
        Job {
            id: triggers
                .first()
                .map(|t| t.job_id)
                .unwrap_or_else(Uuid::new_v4),
            name: name.to_string(),
            status: JobStatus::Enabled,
            queue_name: queue.to_string(),
            triggers,
        }
    }

    #[tokio::test]
    async fn schedules_a_new_job_with_its_enabled_triggers() {
        let job_id = Uuid::new_v4();
        let t1 = trigger(job_id, "0 0 * * * ?", TriggerStatus::Enabled);
        let j1 = job("scenario-a", "q1", vec![t1.clone()]);

        let store = FakeJobStore::new(vec![j1.clone()]);
        let scheduler = FakeScheduler::new();
        let mut engine = engine(store, scheduler.clone());

        engine.reconcile().await.unwrap();

        assert!(scheduler.registered_keys().contains(&job_id.to_string()));
        let scheduled = scheduler.scheduled_for(&job_id.to_string());
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, t1.id.to_string());
        assert_eq!(
            scheduled[0].1,
            FirePolicy::Cron("0 0 * * * ?".to_string())
        );
        assert_eq!(engine.cached_jobs(), 1);
    }

    #[tokio::test]
    async fn second_pass_without_store_changes_is_a_noop() {
        let job_id = Uuid::new_v4();
        let j1 = job(
            "idempotent",
            "q1",
            vec![trigger(job_id, "0 0 * * * *", TriggerStatus::Enabled)],
        );

        let store = FakeJobStore::new(vec![j1]);
        let scheduler = FakeScheduler::new();
        let mut engine = engine(store, scheduler.clone());

        engine.reconcile().await.unwrap();
        let mutations_after_first = scheduler.mutation_count();

        engine.reconcile().await.unwrap();
        assert_eq!(scheduler.mutation_count(), mutations_after_first);
    }

    #[tokio::test]
    async fn invalid_cron_disables_the_trigger_and_keeps_siblings() {
        let job_id = Uuid::new_v4();
        let bad = trigger(job_id, "not-a-cron", TriggerStatus::Enabled);
        let good = trigger(job_id, "0 30 * * * *", TriggerStatus::Enabled);
        let j1 = job("mixed", "q1", vec![bad.clone(), good.clone()]);

        let store = FakeJobStore::new(vec![j1]);
        let scheduler = FakeScheduler::new();
        let mut engine = engine(store.clone(), scheduler.clone());

        engine.reconcile().await.unwrap();

        assert_eq!(store.disabled(), vec![bad.id]);
        let scheduled = scheduler.scheduled_for(&job_id.to_string());
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, good.id.to_string());
        assert!(scheduler.registered_keys().contains(&job_id.to_string()));
    }

    #[tokio::test]
    async fn job_with_only_an_invalid_trigger_is_absent_from_the_scheduler() {
        let job_id = Uuid::new_v4();
        let bad = trigger(job_id, "not-a-cron", TriggerStatus::Enabled);
        let j1 = job("scenario-b", "q1", vec![bad.clone()]);

        let store = FakeJobStore::new(vec![j1]);
        let scheduler = FakeScheduler::new();
        let mut engine = engine(store.clone(), scheduler.clone());

        engine.reconcile().await.unwrap();

        assert_eq!(store.disabled(), vec![bad.id]);
        assert!(!scheduler.registered_keys().contains(&job_id.to_string()));
        assert_eq!(engine.cached_jobs(), 0);
    }

    #[tokio::test]
    async fn disabled_triggers_are_skipped_without_store_writes() {
        let job_id = Uuid::new_v4();
        let disabled = trigger(job_id, "0 0 * * * *", TriggerStatus::Disabled);
        let enabled = trigger(job_id, "0 30 * * * *", TriggerStatus::Enabled);
        let j1 = job("partial", "q1", vec![disabled, enabled.clone()]);

        let store = FakeJobStore::new(vec![j1]);
        let scheduler = FakeScheduler::new();
        let mut engine = engine(store.clone(), scheduler.clone());

        engine.reconcile().await.unwrap();

        assert!(store.disabled().is_empty());
        let scheduled = scheduler.scheduled_for(&job_id.to_string());
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, enabled.id.to_string());
    }

    #[tokio::test]
    async fn queue_change_causes_exactly_one_replace_cycle() {
        let changing_id = Uuid::new_v4();
        let stable_id = Uuid::new_v4();
        let changing = job(
            "changing",
            "q1",
            vec![trigger(changing_id, "0 0 * * * *", TriggerStatus::Enabled)],
        );
        let stable = job(
            "stable",
            "q2",
            vec![trigger(stable_id, "0 15 * * * *", TriggerStatus::Enabled)],
        );

        let store = FakeJobStore::new(vec![changing.clone(), stable.clone()]);
        let scheduler = FakeScheduler::new();
        let mut engine = engine(store.clone(), scheduler.clone());

        engine.reconcile().await.unwrap();

        let mut mutated = changing.clone();
        mutated.queue_name = "q1-moved".to_string();
        store.set_snapshot(vec![mutated, stable]);

        let registers_before = scheduler.register_calls.lock().unwrap().len();
        let unregisters_before = scheduler.unregister_calls.lock().unwrap().len();

        engine.reconcile().await.unwrap();

        let register_calls = scheduler.register_calls.lock().unwrap().clone();
        let unregister_calls = scheduler.unregister_calls.lock().unwrap().clone();

        assert_eq!(register_calls.len() - registers_before, 1);
        assert_eq!(unregister_calls.len() - unregisters_before, 1);
        assert_eq!(register_calls.last().unwrap(), &changing_id.to_string());
        assert_eq!(unregister_calls.last().unwrap(), &changing_id.to_string());
    }

    #[tokio::test]
    async fn removed_job_is_unregistered_and_evicted() {
        let job_id = Uuid::new_v4();
        let j1 = job(
            "vanishing",
            "q1",
            vec![trigger(job_id, "0 0 * * * *", TriggerStatus::Enabled)],
        );

        let store = FakeJobStore::new(vec![j1]);
        let scheduler = FakeScheduler::new();
        let mut engine = engine(store.clone(), scheduler.clone());

        engine.reconcile().await.unwrap();
        assert_eq!(engine.cached_jobs(), 1);

        store.set_snapshot(Vec::new());
        engine.reconcile().await.unwrap();

        assert!(!scheduler.registered_keys().contains(&job_id.to_string()));
        assert_eq!(engine.cached_jobs(), 0);
    }

    #[tokio::test]
    async fn stale_registration_aborts_that_job_only() {
        let stale_id = Uuid::new_v4();
        let fresh_id = Uuid::new_v4();
        let stale = job(
            "stale",
            "q1",
            vec![trigger(stale_id, "0 0 * * * *", TriggerStatus::Enabled)],
        );
        let fresh = job(
            "fresh",
            "q2",
            vec![trigger(fresh_id, "0 15 * * * *", TriggerStatus::Enabled)],
        );

        let store = FakeJobStore::new(vec![stale.clone(), fresh.clone()]);
        let scheduler = FakeScheduler::new();

        // Simulate a registration left over from a previous process life
        scheduler
            .registered
            .lock()
            .unwrap()
            .insert(stale_id.to_string());

        let mut engine = engine(store, scheduler.clone());
        engine.reconcile().await.unwrap();

        // The stale job was skipped and is not cached, so it will be
        // retried on the next pass; the fresh job went through normally
        assert_eq!(engine.cached_jobs(), 1);
        assert!(scheduler.registered_keys().contains(&fresh_id.to_string()));
        assert!(scheduler
            .register_calls
            .lock()
            .unwrap()
            .iter()
            .all(|key| key != &stale_id.to_string()));
    }

    #[tokio::test]
    async fn immediate_mode_schedules_one_run_once_trigger_per_job() {
        let job_id = Uuid::new_v4();
        let j1 = job(
            "dev-mode",
            "q1",
            vec![
                trigger(job_id, "0 0 * * * *", TriggerStatus::Enabled),
                trigger(job_id, "0 30 * * * *", TriggerStatus::Enabled),
            ],
        );

        let store = FakeJobStore::new(vec![j1]);
        let scheduler = FakeScheduler::new();
        let mut engine = ReconciliationEngine::new(
            store,
            scheduler.clone(),
            Arc::new(NoopHandler),
            TriggerMode::Immediate,
        );

        engine.reconcile().await.unwrap();

        let scheduled = scheduler.scheduled_for(&job_id.to_string());
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1, FirePolicy::Immediate);
    }
}
