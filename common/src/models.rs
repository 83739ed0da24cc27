use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Job / Trigger catalog
// ============================================================================

/// Job represents a queue-bound unit of scheduled work with its triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub queue_name: String,
    pub triggers: Vec<Trigger>,
}

impl Job {
    /// Trigger sets are compared by matching trigger ids; order is irrelevant.
    fn triggers_match(&self, other: &[Trigger]) -> bool {
        if self.triggers.len() != other.len() {
            return false;
        }

        other.iter().all(|trigger| {
            self.triggers
                .iter()
                .find(|own| own.id == trigger.id)
                .is_some_and(|own| own == trigger)
        })
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.status == other.status
            && self.queue_name == other.queue_name
            && self.triggers_match(&other.triggers)
    }
}

impl Eq for Job {}

/// Trigger is a cron-based firing rule attached to a Job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub job_id: Uuid,
    pub cron_expression: String,
    pub status: TriggerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Enabled,
    Disabled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Enabled => write!(f, "enabled"),
            JobStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(JobStatus::Enabled),
            "disabled" => Ok(JobStatus::Disabled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Enabled,
    Disabled,
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerStatus::Enabled => write!(f, "enabled"),
            TriggerStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for TriggerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(TriggerStatus::Enabled),
            "disabled" => Ok(TriggerStatus::Disabled),
            _ => Err(format!("Invalid trigger status: {}", s)),
        }
    }
}

// ============================================================================
// Store / Product catalog
// ============================================================================

/// Store is identified by its domain name (unique by convention)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub domain: String,
    pub version: i64,
}

/// Product tracked for price refreshes, owned by exactly one Store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub url: String,
    pub store_id: Uuid,
    pub state: ProductState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every update
    pub version: i64,
}

/// ProductState drives the refresh batch processor.
///
/// The orchestrator only moves products from `Scheduled` to `Processing`;
/// `Processed` and `Failed` are written back by the downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductState {
    Scheduled,
    Processing,
    Processed,
    Failed,
}

impl fmt::Display for ProductState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductState::Scheduled => write!(f, "scheduled"),
            ProductState::Processing => write!(f, "processing"),
            ProductState::Processed => write!(f, "processed"),
            ProductState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProductState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ProductState::Scheduled),
            "processing" => Ok(ProductState::Processing),
            "processed" => Ok(ProductState::Processed),
            "failed" => Ok(ProductState::Failed),
            _ => Err(format!("Invalid product state: {}", s)),
        }
    }
}
