//! Broker queue declarations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::{DbError, get_db};

const TABLE: &str = "broker_queue";

/// Repository for declared queues.
pub struct QueueRepository;

/// A declared queue as read back from the database.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Thing>,
    pub name: String,
    pub durable: bool,
    pub declared_at: DateTime<Utc>,
}

/// Omits `declared_at` so SurrealDB fills in the default.
#[derive(Debug, Clone, Serialize)]
struct QueueCreate {
    name: String,
    durable: bool,
}

impl QueueRepository {
    /// Declare a durable queue. Existing declarations are left untouched.
    pub async fn declare(name: &str) -> Result<QueueRecord, DbError> {
        if let Some(existing) = Self::find(name).await? {
            return Ok(existing);
        }

        let db = get_db()?;
        let record: Option<QueueRecord> = db
            .create((TABLE, name))
            .content(QueueCreate {
                name: name.to_string(),
                durable: true,
            })
            .await?;

        tracing::debug!("Declared queue {}", name);
        record.ok_or_else(|| DbError::Query(format!("Failed to declare queue {name}")))
    }

    pub async fn find(name: &str) -> Result<Option<QueueRecord>, DbError> {
        let db = get_db()?;
        let record: Option<QueueRecord> = db.select((TABLE, name)).await?;
        Ok(record)
    }

    pub async fn exists(name: &str) -> Result<bool, DbError> {
        Ok(Self::find(name).await?.is_some())
    }

    /// All declared queues ordered by name.
    pub async fn list() -> Result<Vec<QueueRecord>, DbError> {
        let db = get_db()?;
        let mut result = db
            .query("SELECT * FROM broker_queue ORDER BY name ASC")
            .await?;
        let records: Vec<QueueRecord> = result.take(0)?;
        Ok(records)
    }
}
