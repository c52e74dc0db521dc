//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates the broker tables, fields, and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(BROKER_QUEUE_SCHEMA).await?;
    db.query(BROKER_MESSAGE_SCHEMA).await?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Declared queues. The record id is the queue name.
const BROKER_QUEUE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS broker_queue SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS name ON broker_queue TYPE string;
DEFINE FIELD IF NOT EXISTS durable ON broker_queue TYPE bool DEFAULT true;
DEFINE FIELD IF NOT EXISTS declared_at ON broker_queue TYPE datetime DEFAULT time::now();
"#;

/// Messages waiting in, or fetched from, a queue.
const BROKER_MESSAGE_SCHEMA: &str = r#"
-- Ready and in-flight messages. Acknowledged messages are deleted.
DEFINE TABLE IF NOT EXISTS broker_message SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS message_id ON broker_message TYPE string;
DEFINE FIELD IF NOT EXISTS queue ON broker_message TYPE string;
DEFINE FIELD IF NOT EXISTS content_type ON broker_message TYPE string;
DEFINE FIELD IF NOT EXISTS headers ON broker_message FLEXIBLE TYPE object DEFAULT {};
DEFINE FIELD IF NOT EXISTS body ON broker_message TYPE array<int>;
DEFINE FIELD IF NOT EXISTS state ON broker_message TYPE string DEFAULT "ready";
DEFINE FIELD IF NOT EXISTS delivery_tag ON broker_message TYPE option<string>;
DEFINE FIELD IF NOT EXISTS deliveries ON broker_message TYPE int DEFAULT 0;

-- Fetch order: oldest ready message of a queue first
DEFINE INDEX IF NOT EXISTS message_queue_state ON broker_message FIELDS queue, state, message_id;
DEFINE INDEX IF NOT EXISTS message_delivery ON broker_message FIELDS delivery_tag;
"#;
