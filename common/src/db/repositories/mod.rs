// Repository implementations for catalog access

pub mod job;
pub mod product;

pub use job::{JobStore, PgJobRepository};
pub use product::{PgProductRepository, ProductStore, ProductTx};
