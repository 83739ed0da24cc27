use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::handlers::stores::domain_of;
use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::{Product, ProductState};

/// Request to register a product for periodic refreshing
#[derive(Debug, Deserialize)]
pub struct AddProductRequest {
    pub url: Url,
    #[serde(default)]
    pub keep_query_params: bool,
}

/// Query strings usually carry session noise; drop them unless the caller
/// says the product URL needs them.
fn normalized_url(url: &Url, keep_query_params: bool) -> Url {
    let mut url = url.clone();
    if !keep_query_params {
        url.set_query(None);
    }
    url
}

/// Register a product under the store owning its URL host
#[tracing::instrument(skip(state, req))]
pub async fn add_product(
    State(state): State<AppState>,
    Json(req): Json<AddProductRequest>,
) -> Result<Json<SuccessResponse<Uuid>>, ErrorResponse> {
    let domain = domain_of(&req.url)?;

    let store = state
        .products
        .find_store_by_domain(domain)
        .await
        .map_err(|e| {
            ErrorResponse::new("database_error", format!("Failed to look up store: {}", e))
        })?
        .ok_or_else(|| {
            ErrorResponse::new("not_found", format!("No store registered for '{}'", domain))
        })?;

    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4(),
        url: normalized_url(&req.url, req.keep_query_params).to_string(),
        store_id: store.id,
        state: ProductState::Scheduled,
        created_at: now,
        updated_at: now,
        last_refreshed_at: None,
        version: 0,
    };

    state.products.insert_product(&product).await.map_err(|e| {
        ErrorResponse::new("database_error", format!("Failed to create product: {}", e))
    })?;

    Ok(Json(SuccessResponse::new(product.id)))
}
