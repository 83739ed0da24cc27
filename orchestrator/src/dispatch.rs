// Dispatch handler: fired by the live scheduler, publishes an empty
// message to the job's bound queue

use async_trait::async_trait;
use common::queue::Broker;
use common::scheduler::{FireContext, JobHandler, JOB_QUEUE_KEY};
use std::sync::Arc;
use tracing::{error, info};

/// Fire-and-forget dispatch: a publish failure is logged and swallowed.
/// There is no retry, backoff, or dead-lettering; the next trigger firing
/// is the only retry this path gets.
pub struct DispatchHandler {
    broker: Arc<dyn Broker>,
}

impl DispatchHandler {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl JobHandler for DispatchHandler {
    async fn execute(&self, ctx: FireContext) -> anyhow::Result<()> {
        let queue = ctx
            .payload_str(JOB_QUEUE_KEY)
            .map(str::trim)
            .unwrap_or_default();

        if queue.is_empty() {
            error!(job_key = %ctx.job_key, "Received empty queue name for job");
            return Ok(());
        }

        match self.broker.publish(queue, &[]).await {
            Ok(()) => {
                info!(queue = %queue, "Published message on queue");
            }
            Err(e) => {
                error!(
                    queue = %queue,
                    job_key = %ctx.job_key,
                    error = %e,
                    "Failed to publish message on queue"
                );
            }
        }

        Ok(())
    }
}
