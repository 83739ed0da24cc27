// Handler contract invoked by the live scheduler when a trigger fires

use crate::scheduler::live::{JobKey, TriggerKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Payload key under which a job's bound queue name is stored
pub const JOB_QUEUE_KEY: &str = "queue_name";

/// Execution context handed to a handler on every firing
#[derive(Debug, Clone)]
pub struct FireContext {
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    pub payload: HashMap<String, String>,
    pub fired_at: DateTime<Utc>,
}

impl FireContext {
    /// Convenience accessor for string payload entries
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

/// A unit of work fired by the live scheduler.
///
/// Errors escaping `execute` are logged by the firing task and never
/// unwind the scheduler; handlers that want softer semantics (swallow and
/// continue) handle their own failures and return `Ok`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: FireContext) -> anyhow::Result<()>;
}
