// Error handling framework

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("No next fire time available for expression '{0}'")]
    NoNextFireTime(String),
}

/// Live scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job key '{0}' is already registered")]
    DuplicateJobKey(String),

    #[error("Job key '{0}' is not registered")]
    JobNotRegistered(String),

    #[error("Scheduler is not running")]
    NotRunning,

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

/// Message broker errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Destination configuration failed: {0}")]
    DestinationConfiguration(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Publish acknowledgment timed out after {0} seconds")]
    AckTimeout(u64),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),
}
