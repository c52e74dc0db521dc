//! Work-queue payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::Publishing;

/// Content type of encoded queue messages.
pub const MESSAGE_CONTENT_TYPE: &str = "application/json";

/// An email waiting to be turned into a calendar event.
///
/// Encoded as `{email_content, user_id, retry_count, timestamp}` with an
/// RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub email_content: String,
    pub user_id: String,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl QueueMessage {
    /// A first attempt stamped now.
    pub fn new(email_content: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            email_content: email_content.into(),
            user_id: user_id.into(),
            retry_count: 0,
            timestamp: Utc::now(),
        }
    }

    /// The message as it is requeued after a failed attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn to_publishing(&self) -> Result<Publishing, serde_json::Error> {
        Ok(Publishing::new(MESSAGE_CONTENT_TYPE, self.encode()?))
    }
}
