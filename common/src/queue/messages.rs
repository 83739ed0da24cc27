// Wire messages published by the orchestrator

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request for a downstream consumer to refresh one product's price.
///
/// `tracking_id` is freshly generated per publish and doubles as the
/// consumer-side idempotency key: the publish happens before the local
/// transaction commits, so a consumer may see a request for a product
/// whose state transition was later rolled back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub tracking_id: Uuid,
    pub product_id: Uuid,
    pub url: String,
}

impl RefreshRequest {
    pub fn new(product_id: Uuid, url: impl Into<String>) -> Self {
        Self {
            tracking_id: Uuid::new_v4(),
            product_id,
            url: url.into(),
        }
    }
}
