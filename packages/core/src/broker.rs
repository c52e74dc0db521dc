//! Message broker contract.
//!
//! Queues are durable and deliveries are manually acknowledged: a fetched
//! message stays in flight until it is acked, nacked, or the broker closes.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::BrokerError;

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Future type returned by brokers.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = BrokerResult<T>> + Send + 'a>>;

/// Identifies one delivery of a message. A redelivery gets a new tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryTag(pub Ulid);

impl DeliveryTag {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a tag from its string form.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for DeliveryTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publishing {
    pub content_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Publishing {
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// A JSON body.
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::new("application/json", body)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A message fetched from a queue, awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: String,
    pub publishing: Publishing,
    /// Whether this message was delivered before and returned unacknowledged.
    pub redelivered: bool,
}

/// Durable queue broker with manual acknowledgment.
///
/// Implementations must be safe to share between consumers; each delivery
/// goes to exactly one consumer.
pub trait MessageBroker: Send + Sync + 'static {
    /// Declare a durable queue. Declaring an existing queue is a no-op.
    fn declare_queue<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()>;

    fn publish<'a>(&'a self, queue: &'a str, publishing: Publishing) -> BrokerFuture<'a, ()>;

    /// Take the next ready message, if any, and hold it in flight.
    fn fetch<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, Option<Delivery>>;

    /// Remove an in-flight message for good.
    fn ack(&self, tag: DeliveryTag) -> BrokerFuture<'_, ()>;

    /// Return an in-flight message to its queue, or drop it when `requeue` is false.
    fn nack(&self, tag: DeliveryTag, requeue: bool) -> BrokerFuture<'_, ()>;

    /// Release the broker. In-flight messages return to their queues.
    fn close(&self) -> BrokerFuture<'_, ()>;
}
