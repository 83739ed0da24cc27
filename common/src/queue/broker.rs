// Message broker capability consumed by the orchestrator

use crate::errors::QueueError;
use async_trait::async_trait;

/// Static description of a named destination, declared once at startup
#[derive(Debug, Clone)]
pub struct Destination {
    pub name: String,
    /// Maximum age for retained messages (in seconds)
    pub max_age_seconds: u64,
    /// Maximum number of messages to retain
    pub max_messages: i64,
}

impl Destination {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_age_seconds: 86400, // 24 hours
            max_messages: 1_000_000,
        }
    }
}

/// Broker capability: declare destinations, publish messages.
///
/// Delivery is at-least-once; callers that need idempotence must carry
/// their own correlation key in the payload.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare the static destination topology
    async fn configure_destinations(&self, destinations: &[Destination]) -> Result<(), QueueError>;

    /// Publish a single message to a named destination
    async fn publish(&self, destination: &str, payload: &[u8]) -> Result<(), QueueError>;
}
