//! Pipeline errors surfaced to callers.

use calendar_core::{BrokerError, ConfigError};
use thiserror::Error;

/// Errors returned by the pipeline handle and its setup helpers.
///
/// Failures of individual messages never show up here; they end in the
/// dead-letter queue and are reported as pipeline events.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The broker refused a new email event.
    #[error("Failed to publish email event: {0}")]
    Publish(#[source] BrokerError),

    #[error("Failed to encode queue message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(#[source] BrokerError),

    #[error("Failed to spawn pipeline actors: {0}")]
    Spawn(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),
}
