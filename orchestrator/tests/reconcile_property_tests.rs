// Property-based tests for the reconciliation engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::config::TriggerMode;
use common::db::repositories::JobStore;
use common::errors::{DatabaseError, SchedulerError};
use common::models::{Job, JobStatus, Trigger, TriggerStatus};
use common::scheduler::{
    FireContext, FirePolicy, JobHandler, JobKey, JobSpec, LiveScheduler, MisfirePolicy, TriggerKey,
};
use orchestrator::reconcile::ReconciliationEngine;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Job store mock returning a fixed snapshot
struct SnapshotStore {
    snapshot: Vec<Job>,
    disabled: Mutex<Vec<Uuid>>,
}

impl SnapshotStore {
    fn new(snapshot: Vec<Job>) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            disabled: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl JobStore for SnapshotStore {
    async fn load_schedulable_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        Ok(self.snapshot.clone())
    }

    async fn disable_trigger(&self, trigger_id: Uuid) -> Result<(), DatabaseError> {
        self.disabled.lock().unwrap().push(trigger_id);
        Ok(())
    }
}

/// Live scheduler mock counting every mutation
#[derive(Default)]
struct CountingScheduler {
    registered: Mutex<HashSet<String>>,
    mutations: Mutex<usize>,
}

impl CountingScheduler {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn mutation_count(&self) -> usize {
        *self.mutations.lock().unwrap()
    }

    fn registered_count(&self) -> usize {
        self.registered.lock().unwrap().len()
    }
}

#[async_trait]
impl LiveScheduler for CountingScheduler {
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
        _replace_existing: bool,
    ) -> Result<(), SchedulerError> {
        self.registered.lock().unwrap().insert(job_key.to_string());
        *self.mutations.lock().unwrap() += 1;
        Ok(())
    }

    async fn schedule_trigger(
        &self,
        _trigger_key: TriggerKey,
        _job_key: JobKey,
        _policy: FirePolicy,
        _misfire: MisfirePolicy,
        _timezone: Tz,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        *self.mutations.lock().unwrap() += 1;
        Ok(Some(Utc::now()))
    }

    async fn unregister_job(&self, job_key: &JobKey) -> Result<bool, SchedulerError> {
        let existed = self.registered.lock().unwrap().remove(job_key.as_str());
        *self.mutations.lock().unwrap() += 1;
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

/// One generated trigger row: cron validity, enablement
#[derive(Debug, Clone)]
struct TriggerSpec {
    valid: bool,
    enabled: bool,
}

fn trigger_spec() -> impl Strategy<Value = TriggerSpec> {
    (any::<bool>(), any::<bool>()).prop_map(|(valid, enabled)| TriggerSpec { valid, enabled })
}

fn job_from_specs(specs: &[TriggerSpec]) -> Job {
    let job_id = Uuid::new_v4();
    let triggers = specs
        .iter()
        .map(|spec| Trigger {
            id: Uuid::new_v4(),
            job_id,
            cron_expression: if spec.valid {
                "0 0 * * * *".to_string()
            } else {
                "not-a-cron".to_string()
            },
            status: if spec.enabled {
                TriggerStatus::Enabled
            } else {
                TriggerStatus::Disabled
            },
        })
        .collect();

    Job {
        id: job_id,
        name: format!("job-{}", job_id),
        status: JobStatus::Enabled,
        queue_name: "q".to_string(),
        triggers,
    }
}

fn schedulable(specs: &[TriggerSpec]) -> bool {
    specs.iter().any(|spec| spec.valid && spec.enabled)
}

proptest! {
    /// After one pass over any snapshot, exactly the jobs owning at least
    /// one valid enabled trigger are registered and cached; the rest left
    /// no residue in the scheduler.
    #[test]
    fn one_pass_registers_exactly_the_schedulable_jobs(
        job_specs in prop::collection::vec(
            prop::collection::vec(trigger_spec(), 1..4),
            0..6,
        ),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let snapshot: Vec<Job> = job_specs.iter().map(|s| job_from_specs(s)).collect();
            let expected = job_specs.iter().filter(|s| schedulable(s)).count();

            let store = SnapshotStore::new(snapshot);
            let scheduler = CountingScheduler::new();
            let mut engine = ReconciliationEngine::new(
                store,
                scheduler.clone(),
                Arc::new(NoopHandler),
                TriggerMode::Cron,
            );

            engine.reconcile().await.unwrap();

            prop_assert_eq!(engine.cached_jobs(), expected);
            prop_assert_eq!(scheduler.registered_count(), expected);
            Ok(())
        })?;
    }

    /// Reconciliation is idempotent: a second pass over the same snapshot
    /// performs no scheduler mutations at all. Jobs without a single live
    /// trigger are excluded; the engine re-attempts those every pass until
    /// the store stops returning them.
    #[test]
    fn second_pass_over_the_same_snapshot_mutates_nothing(
        job_specs in prop::collection::vec(
            prop::collection::vec(trigger_spec(), 1..4),
            0..6,
        ),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let snapshot: Vec<Job> = job_specs
                .iter()
                .filter(|s| schedulable(s))
                .map(|s| job_from_specs(s))
                .collect();

            let store = SnapshotStore::new(snapshot);
            let scheduler = CountingScheduler::new();
            let mut engine = ReconciliationEngine::new(
                store,
                scheduler.clone(),
                Arc::new(NoopHandler),
                TriggerMode::Cron,
            );

            engine.reconcile().await.unwrap();
            let after_first = scheduler.mutation_count();

            engine.reconcile().await.unwrap();
            prop_assert_eq!(scheduler.mutation_count(), after_first);
            Ok(())
        })?;
    }
}
