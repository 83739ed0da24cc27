// Job/Trigger catalog repository

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Job, JobStatus, Trigger, TriggerStatus};
use async_trait::async_trait;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

/// Read/write access to the Job/Trigger catalog used by reconciliation.
///
/// Job and Trigger rows are created and maintained by external processes;
/// the orchestrator only reads them, except for disabling a trigger whose
/// cron expression fails validation.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load all enabled jobs that have at least one enabled trigger,
    /// with their full trigger sets eagerly loaded
    async fn load_schedulable_jobs(&self) -> Result<Vec<Job>, DatabaseError>;

    /// Persist `status = disabled` for a single trigger
    async fn disable_trigger(&self, trigger_id: Uuid) -> Result<(), DatabaseError>;
}

/// PostgreSQL-backed job catalog repository
pub struct PgJobRepository {
    pool: DbPool,
}

impl PgJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobRepository {
    #[instrument(skip(self))]
    async fn load_schedulable_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let job_rows = sqlx::query(
            r#"
            SELECT id, name, status, queue_name
            FROM jobs
            WHERE status = 'enabled'
              AND EXISTS (
                  SELECT 1 FROM triggers
                  WHERE triggers.job_id = jobs.id AND triggers.status = 'enabled'
              )
            ORDER BY name
            "#,
        )
        .fetch_all(self.pool.pool())
        .await?;

        let mut jobs = Vec::with_capacity(job_rows.len());
        for row in job_rows {
            let status: String = row.try_get("status")?;
            jobs.push(Job {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                status: JobStatus::from_str(&status).map_err(DatabaseError::QueryFailed)?,
                queue_name: row.try_get("queue_name")?,
                triggers: Vec::new(),
            });
        }

        if jobs.is_empty() {
            return Ok(jobs);
        }

        // Eagerly load the full trigger set of every selected job, disabled
        // triggers included; reconciliation needs them for equality checks.
        let job_ids: Vec<Uuid> = jobs.iter().map(|job| job.id).collect();
        let trigger_rows = sqlx::query(
            r#"
            SELECT id, job_id, cron_expression, status
            FROM triggers
            WHERE job_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&job_ids)
        .fetch_all(self.pool.pool())
        .await?;

        let mut by_job: HashMap<Uuid, Vec<Trigger>> = HashMap::new();
        for row in trigger_rows {
            let status: String = row.try_get("status")?;
            let trigger = Trigger {
                id: row.try_get("id")?,
                job_id: row.try_get("job_id")?,
                cron_expression: row.try_get("cron_expression")?,
                status: TriggerStatus::from_str(&status).map_err(DatabaseError::QueryFailed)?,
            };
            by_job.entry(trigger.job_id).or_default().push(trigger);
        }

        for job in &mut jobs {
            if let Some(triggers) = by_job.remove(&job.id) {
                job.triggers = triggers;
            }
        }

        tracing::debug!(count = jobs.len(), "Loaded schedulable jobs");
        Ok(jobs)
    }

    #[instrument(skip(self))]
    async fn disable_trigger(&self, trigger_id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE triggers SET status = 'disabled' WHERE id = $1")
            .bind(trigger_id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("trigger {}", trigger_id)));
        }

        tracing::info!(trigger_id = %trigger_id, "Trigger disabled");
        Ok(())
    }
}
