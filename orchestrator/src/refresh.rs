// Product refresh batch processor: per-item transactional state
// transition paired with a broker publish

use async_trait::async_trait;
use chrono::Utc;
use common::db::repositories::ProductStore;
use common::errors::{DatabaseError, QueueError};
use common::models::Product;
use common::queue::{Broker, RefreshRequest};
use common::scheduler::{FireContext, JobHandler};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Failed to serialize refresh request: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of one product within a batch execution
#[derive(Debug)]
pub enum ItemOutcome {
    Committed(Uuid),
    Failed { product_id: Uuid, reason: String },
}

/// Aggregate result of one batch execution.
///
/// `abandoned` counts items that were never attempted because an earlier
/// item failed; they are still in state `scheduled` and get picked up by
/// the next execution.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub outcomes: Vec<ItemOutcome>,
    pub abandoned: usize,
}

impl RefreshReport {
    pub fn committed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Committed(_)))
            .count()
    }

    pub fn failure(&self) -> Option<(&Uuid, &str)> {
        self.outcomes.iter().find_map(|o| match o {
            ItemOutcome::Failed { product_id, reason } => Some((product_id, reason.as_str())),
            _ => None,
        })
    }
}

/// Moves scheduled products to `processing`, one transaction per product,
/// publishing a refresh request before each commit.
///
/// The publish deliberately happens before the commit: a downstream
/// consumer may observe a request whose state transition never committed,
/// so the tracking id in the request is its idempotency key.
pub struct ProductRefreshProcessor {
    products: Arc<dyn ProductStore>,
    broker: Arc<dyn Broker>,
    queue: String,
}

impl ProductRefreshProcessor {
    pub fn new(products: Arc<dyn ProductStore>, broker: Arc<dyn Broker>, queue: String) -> Self {
        Self {
            products,
            broker,
            queue,
        }
    }

    /// One batch execution over all currently scheduled products.
    ///
    /// The first failing item is rolled back and terminates the batch;
    /// already committed items stay committed.
    #[instrument(skip(self))]
    pub async fn process_scheduled(&self) -> Result<RefreshReport, RefreshError> {
        let products = self.products.list_scheduled().await?;
        let total = products.len();

        let mut report = RefreshReport::default();

        for (index, product) in products.iter().enumerate() {
            match self.process_one(product).await {
                Ok(()) => report.outcomes.push(ItemOutcome::Committed(product.id)),
                Err(e) => {
                    error!(product_id = %product.id, error = %e, "Product processing failed");
                    report.outcomes.push(ItemOutcome::Failed {
                        product_id: product.id,
                        reason: e.to_string(),
                    });
                    report.abandoned = total - index - 1;
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn process_one(&self, product: &Product) -> Result<(), RefreshError> {
        let mut tx = self.products.begin().await?;
        tx.mark_processing(product.id, Utc::now()).await?;

        let request = RefreshRequest::new(product.id, product.url.clone());
        let payload = serde_json::to_vec(&request)?;
        self.broker.publish(&self.queue, &payload).await?;

        info!(
            product_id = %product.id,
            tracking_id = %request.tracking_id,
            "Product processing"
        );

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ProductRefreshProcessor {
    /// Outer execution wrapper: no failure escapes past here, so a bad
    /// batch never takes the host process down.
    async fn execute(&self, ctx: FireContext) -> anyhow::Result<()> {
        match self.process_scheduled().await {
            Ok(report) => {
                if let Some((product_id, reason)) = report.failure() {
                    error!(
                        job_key = %ctx.job_key,
                        product_id = %product_id,
                        reason = %reason,
                        abandoned = report.abandoned,
                        "Product refresh aborted; remaining items retry next execution"
                    );
                } else {
                    info!(
                        job_key = %ctx.job_key,
                        committed = report.committed(),
                        "Product refresh pass complete"
                    );
                }
            }
            Err(e) => {
                error!(job_key = %ctx.job_key, error = %e, "Product refresh execution failed");
            }
        }

        Ok(())
    }
}
