//! Broker message persistence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::{DbError, get_db};

const TABLE: &str = "broker_message";

/// Delivery state of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Ready,
    InFlight,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Ready => "ready",
            MessageState::InFlight => "in_flight",
        }
    }
}

/// A message held by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Monotonic ULID; fetch order within a queue.
    pub message_id: String,
    pub queue: String,
    pub content_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub state: MessageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_tag: Option<String>,
    #[serde(default)]
    pub deliveries: u32,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct MessageRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    #[serde(flatten)]
    message: StoredMessage,
}

/// Repository for broker messages.
pub struct MessageRepository;

impl MessageRepository {
    /// Store a new ready message.
    pub async fn insert(message: StoredMessage) -> Result<StoredMessage, DbError> {
        let db = get_db()?;
        let id = message.message_id.clone();

        let record: Option<MessageRecord> = db
            .create((TABLE, id.as_str()))
            .content(MessageRecord { id: None, message })
            .await?;

        record
            .map(|r| r.message)
            .ok_or_else(|| DbError::Query(format!("Failed to store message {id}")))
    }

    /// Oldest ready message of `queue`.
    pub async fn next_ready(queue: &str) -> Result<Option<StoredMessage>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT * FROM broker_message
                WHERE queue = $queue AND state = "ready"
                ORDER BY message_id ASC
                LIMIT 1
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        let records: Vec<MessageRecord> = result.take(0)?;
        Ok(records.into_iter().next().map(|r| r.message))
    }

    /// Mark a message in flight under a fresh delivery tag.
    pub async fn mark_in_flight(
        message_id: &str,
        delivery_tag: &str,
        deliveries: u32,
    ) -> Result<StoredMessage, DbError> {
        let db = get_db()?;

        let record: Option<MessageRecord> = db
            .update((TABLE, message_id))
            .merge(serde_json::json!({
                "state": MessageState::InFlight,
                "delivery_tag": delivery_tag,
                "deliveries": deliveries,
            }))
            .await?;

        record
            .map(|r| r.message)
            .ok_or_else(|| DbError::NotFound(format!("Message not found: {message_id}")))
    }

    /// Delete the in-flight message holding `delivery_tag`.
    pub async fn delete_delivery(delivery_tag: &str) -> Result<StoredMessage, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("DELETE broker_message WHERE delivery_tag = $tag RETURN BEFORE")
            .bind(("tag", delivery_tag.to_string()))
            .await?;

        let records: Vec<MessageRecord> = result.take(0)?;
        records
            .into_iter()
            .next()
            .map(|r| r.message)
            .ok_or_else(|| DbError::NotFound(format!("Delivery not found: {delivery_tag}")))
    }

    /// Return the in-flight message holding `delivery_tag` to the ready state.
    pub async fn release_delivery(delivery_tag: &str) -> Result<StoredMessage, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPDATE broker_message
                SET state = "ready", delivery_tag = NONE
                WHERE delivery_tag = $tag
                RETURN AFTER
                "#,
            )
            .bind(("tag", delivery_tag.to_string()))
            .await?;

        let records: Vec<MessageRecord> = result.take(0)?;
        records
            .into_iter()
            .next()
            .map(|r| r.message)
            .ok_or_else(|| DbError::NotFound(format!("Delivery not found: {delivery_tag}")))
    }

    /// Return every in-flight message to the ready state. Returns how many moved.
    pub async fn release_all_in_flight() -> Result<usize, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPDATE broker_message
                SET state = "ready", delivery_tag = NONE
                WHERE state = "in_flight"
                RETURN AFTER
                "#,
            )
            .await?;

        let records: Vec<MessageRecord> = result.take(0)?;
        Ok(records.len())
    }

    /// Messages of `queue` in fetch order, optionally only those in `state`.
    pub async fn list(
        queue: &str,
        state: Option<MessageState>,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let db = get_db()?;

        let query = match state {
            Some(_) => {
                "SELECT * FROM broker_message WHERE queue = $queue AND state = $state ORDER BY message_id ASC"
            }
            None => "SELECT * FROM broker_message WHERE queue = $queue ORDER BY message_id ASC",
        };

        let mut result = db
            .query(query)
            .bind(("queue", queue.to_string()))
            .bind(("state", state.map(|s| s.as_str()).unwrap_or_default()))
            .await?;

        let records: Vec<MessageRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.message).collect())
    }

    /// Number of messages of `queue` in `state`.
    pub async fn count(queue: &str, state: MessageState) -> Result<usize, DbError> {
        Ok(Self::list(queue, Some(state)).await?.len())
    }
}
