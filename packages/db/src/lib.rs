//! SurrealDB integration for the email pipeline.
//!
//! This crate provides database connectivity and a durable message broker
//! whose queues are stored in SurrealDB.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod broker;
mod connection;
mod schema;
pub mod repositories;

pub use broker::SurrealBroker;
pub use connection::{Database, DbConfig, DbError, get_db, init_db};
pub use schema::init_schema;

/// Initialize the database with the given configuration.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<(), DbError> {
    init_db(config).await?;
    init_schema().await?;
    Ok(())
}
