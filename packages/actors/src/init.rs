//! Startup for a SurrealDB-backed pipeline.

use std::sync::Arc;

use calendar_core::QueueConfig;
use db::{DbConfig, SurrealBroker};

use crate::error::PipelineError;
use crate::extractor::EventExtractor;
use crate::pipeline::EmailPipeline;

/// Connect to the broker named by `config.broker_uri` and start consuming.
///
/// This should be called once at startup; the database connection is
/// process-wide.
pub async fn start_pipeline(
    config: QueueConfig,
    extractor: Arc<dyn EventExtractor>,
) -> Result<EmailPipeline, PipelineError> {
    tracing::info!("Initializing email pipeline...");

    db::init(DbConfig::from_broker_uri(&config.broker_uri)?).await?;
    let broker = SurrealBroker::connect().await?;

    EmailPipeline::start(config, Arc::new(broker), extractor).await
}

/// [`start_pipeline`] with settings read from `MAIL2CAL_*` variables.
pub async fn start_pipeline_from_env(
    extractor: Arc<dyn EventExtractor>,
) -> Result<EmailPipeline, PipelineError> {
    start_pipeline(QueueConfig::from_env()?, extractor).await
}
