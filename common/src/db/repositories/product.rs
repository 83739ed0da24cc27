// Store/Product catalog repository

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Product, ProductState, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

/// Read/write access to the Store/Product catalog.
///
/// The refresh batch processor drives products through
/// `scheduled → processing` inside per-item transactions; the API surface
/// inserts new rows in state `scheduled`.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// All products currently in state `scheduled`, in insertion order
    async fn list_scheduled(&self) -> Result<Vec<Product>, DatabaseError>;

    /// Open a transaction for a single product state transition.
    /// Dropping the returned handle without committing rolls back.
    async fn begin(&self) -> Result<Box<dyn ProductTx>, DatabaseError>;

    async fn insert_store(&self, store: &Store) -> Result<(), DatabaseError>;

    async fn find_store_by_domain(&self, domain: &str) -> Result<Option<Store>, DatabaseError>;

    async fn insert_product(&self, product: &Product) -> Result<(), DatabaseError>;
}

/// A single-product transaction handle
#[async_trait]
pub trait ProductTx: Send {
    /// Move the product to `processing` and stamp its last refresh time
    async fn mark_processing(
        &mut self,
        product_id: Uuid,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// PostgreSQL-backed store/product repository
pub struct PgProductRepository {
    pool: DbPool,
}

impl PgProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn product_from_row(row: &sqlx::postgres::PgRow) -> Result<Product, DatabaseError> {
    let state: String = row.try_get("state")?;
    Ok(Product {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        store_id: row.try_get("store_id")?,
        state: ProductState::from_str(&state).map_err(DatabaseError::QueryFailed)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_refreshed_at: row.try_get("last_refreshed_at")?,
        version: row.try_get("version")?,
    })
}

#[async_trait]
impl ProductStore for PgProductRepository {
    #[instrument(skip(self))]
    async fn list_scheduled(&self) -> Result<Vec<Product>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, store_id, state, created_at, updated_at, last_refreshed_at, version
            FROM products
            WHERE state = 'scheduled'
            ORDER BY created_at
            "#,
        )
        .fetch_all(self.pool.pool())
        .await?;

        let products = rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(count = products.len(), "Loaded scheduled products");
        Ok(products)
    }

    async fn begin(&self) -> Result<Box<dyn ProductTx>, DatabaseError> {
        let tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(Box::new(PgProductTx { tx }))
    }

    #[instrument(skip(self, store), fields(domain = %store.domain))]
    async fn insert_store(&self, store: &Store) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO stores (id, domain, version) VALUES ($1, $2, $3)")
            .bind(store.id)
            .bind(&store.domain)
            .bind(store.version)
            .execute(self.pool.pool())
            .await?;

        tracing::info!(store_id = %store.id, domain = %store.domain, "Store created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_store_by_domain(&self, domain: &str) -> Result<Option<Store>, DatabaseError> {
        let row = sqlx::query("SELECT id, domain, version FROM stores WHERE domain = $1")
            .bind(domain)
            .fetch_optional(self.pool.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(Store {
                id: row.try_get("id")?,
                domain: row.try_get("domain")?,
                version: row.try_get("version")?,
            })),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    async fn insert_product(&self, product: &Product) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, url, store_id, state, created_at, updated_at, last_refreshed_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(product.id)
        .bind(&product.url)
        .bind(product.store_id)
        .bind(product.state.to_string())
        .bind(product.created_at)
        .bind(product.updated_at)
        .bind(product.last_refreshed_at)
        .bind(product.version)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(product_id = %product.id, "Product created");
        Ok(())
    }
}

struct PgProductTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ProductTx for PgProductTx {
    async fn mark_processing(
        &mut self,
        product_id: Uuid,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET state = 'processing',
                last_refreshed_at = $2,
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .bind(refreshed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("product {}", product_id)));
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }
}
