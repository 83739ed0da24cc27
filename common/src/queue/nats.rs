// NATS JetStream broker implementation

use crate::config::NatsConfig;
use crate::errors::QueueError;
use crate::queue::broker::{Broker, Destination};
use async_nats::jetstream::{
    stream::{Config as StreamConfig, RetentionPolicy},
    Context as JetStreamContext,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, instrument};

/// NATS JetStream client
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
}

impl NatsClient {
    /// Create a new NATS client and connect to the server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: &NatsConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server successfully");

        let jetstream = async_nats::jetstream::new(client.clone());

        Ok(Self { client, jetstream })
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    /// Flush buffered operations and close the connection
    pub async fn close(&self) -> Result<(), QueueError> {
        self.client
            .flush()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to flush NATS client: {}", e)))
    }
}

/// Broker implementation backed by NATS JetStream.
///
/// Every destination maps to a work-queue stream whose single subject is
/// the destination name; messages are removed once a consumer acknowledges
/// them.
pub struct NatsBroker {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsBroker {
    pub fn new(client: NatsClient, config: &NatsConfig) -> Self {
        Self {
            client,
            publish_timeout: Duration::from_secs(config.publish_timeout_seconds),
        }
    }

    /// Stream names must not contain subject wildcards or whitespace;
    /// destination names double as subjects, so normalize for the stream.
    fn stream_name(destination: &str) -> String {
        destination
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[async_trait]
impl Broker for NatsBroker {
    #[instrument(skip(self, destinations), fields(count = destinations.len()))]
    async fn configure_destinations(&self, destinations: &[Destination]) -> Result<(), QueueError> {
        for destination in destinations {
            let stream_config = StreamConfig {
                name: Self::stream_name(&destination.name),
                subjects: vec![destination.name.clone()],
                retention: RetentionPolicy::WorkQueue,
                max_age: Duration::from_secs(destination.max_age_seconds),
                max_messages: destination.max_messages,
                ..Default::default()
            };

            self.client
                .jetstream()
                .get_or_create_stream(stream_config)
                .await
                .map_err(|e| {
                    QueueError::DestinationConfiguration(format!(
                        "Failed to create stream for destination '{}': {}",
                        destination.name, e
                    ))
                })?;

            info!(destination = %destination.name, "Destination configured");
        }

        Ok(())
    }

    #[instrument(skip(self, payload), fields(destination = %destination, bytes = payload.len()))]
    async fn publish(&self, destination: &str, payload: &[u8]) -> Result<(), QueueError> {
        let ack_future = self
            .client
            .jetstream()
            .publish(destination.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        // Wait for the JetStream acknowledgment with a timeout; an unrouted
        // subject never acks, which surfaces as AckTimeout here.
        match tokio::time::timeout(self.publish_timeout, ack_future).await {
            Ok(Ok(_ack)) => Ok(()),
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Publish not acknowledged: {}",
                e
            ))),
            Err(_) => Err(QueueError::AckTimeout(self.publish_timeout.as_secs())),
        }
    }
}
