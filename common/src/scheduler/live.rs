// Live scheduler capability consumed by the orchestrator

use crate::errors::SchedulerError;
use crate::scheduler::handler::JobHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a registered job (the catalog job id, stringified)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey(String);

impl JobKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for JobKey {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Identity of a scheduled trigger within a job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerKey(String);

impl TriggerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for TriggerKey {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Durable job registration: the bound handler plus its payload data
#[derive(Clone)]
pub struct JobSpec {
    pub handler: Arc<dyn JobHandler>,
    pub payload: HashMap<String, String>,
}

impl JobSpec {
    pub fn new(handler: Arc<dyn JobHandler>) -> Self {
        Self {
            handler,
            payload: HashMap::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// When a trigger fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirePolicy {
    /// Fire on a cron expression, starting now
    Cron(String),
    /// Fire exactly once, immediately
    Immediate,
}

/// What to do when a fire time was missed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfirePolicy {
    /// Fire once on recovery, then realign to the schedule
    FireOnceAndProceed,
}

/// Time-driven scheduling capability.
///
/// Implementations must guarantee that firings of the same job key are
/// never concurrent with each other, and must bound total concurrent
/// handler executions.
#[async_trait]
pub trait LiveScheduler: Send + Sync {
    /// Start dispatching registered triggers
    async fn start(&self) -> Result<(), SchedulerError>;

    /// Stop the scheduler. With `drain`, waits for in-flight handler
    /// executions to finish before returning.
    async fn shutdown(&self, drain: bool) -> Result<(), SchedulerError>;

    /// Whether a job is registered under the given key
    async fn exists(&self, job_key: &JobKey) -> bool;

    /// Register a durable job definition. With `replace_existing` unset,
    /// registering an existing key fails with `DuplicateJobKey`.
    async fn register_job(
        &self,
        job_key: JobKey,
        spec: JobSpec,
        replace_existing: bool,
    ) -> Result<(), SchedulerError>;

    /// Attach a trigger to a registered job; returns the next fire time
    /// in UTC (None for an immediate one-shot that has no further firings)
    async fn schedule_trigger(
        &self,
        trigger_key: TriggerKey,
        job_key: JobKey,
        policy: FirePolicy,
        misfire: MisfirePolicy,
        timezone: Tz,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError>;

    /// Remove a job and all of its triggers; returns whether it existed
    async fn unregister_job(&self, job_key: &JobKey) -> Result<bool, SchedulerError>;
}
