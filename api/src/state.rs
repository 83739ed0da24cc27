use common::db::repositories::ProductStore;
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub products: Arc<dyn ProductStore>,
}

impl AppState {
    pub fn new(products: Arc<dyn ProductStore>) -> Self {
        Self { products }
    }
}
