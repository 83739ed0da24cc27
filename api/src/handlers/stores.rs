use axum::{extract::State, Json};
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::Store;

/// Request to register a new store
#[derive(Debug, Deserialize)]
pub struct AddStoreRequest {
    pub url: Url,
}

/// Extract the store domain from any URL pointing into the store
pub(crate) fn domain_of(url: &Url) -> Result<&str, ErrorResponse> {
    url.host_str()
        .ok_or_else(|| ErrorResponse::new("validation_error", "URL has no host"))
}

/// Register a store, keyed by the host of the submitted URL
#[tracing::instrument(skip(state, req))]
pub async fn add_store(
    State(state): State<AppState>,
    Json(req): Json<AddStoreRequest>,
) -> Result<Json<SuccessResponse<Uuid>>, ErrorResponse> {
    let domain = domain_of(&req.url)?.to_string();

    let store = Store {
        id: Uuid::new_v4(),
        domain,
        version: 0,
    };

    state.products.insert_store(&store).await.map_err(|e| {
        ErrorResponse::new("database_error", format!("Failed to create store: {}", e))
    })?;

    Ok(Json(SuccessResponse::new(store.id)))
}
