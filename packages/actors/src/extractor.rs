//! Event extractor contract.

use std::future::Future;
use std::pin::Pin;

use calendar_core::QueueMessage;
use serde::{Deserialize, Serialize};

/// What a successful extraction produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl Extraction {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// Result type for extractors. Any error is retried until the budget runs out.
pub type ExtractionResult = Result<Extraction, String>;

/// Future type for async extractors.
pub type ExtractionFuture = Pin<Box<dyn Future<Output = ExtractionResult> + Send>>;

/// Turns a queued email into calendar changes.
///
/// Opaque to the pipeline: the consumer only looks at success or failure.
pub trait EventExtractor: Send + Sync + 'static {
    fn process_email(&self, message: &QueueMessage) -> ExtractionFuture;
}

/// A simple function-based extractor.
pub struct FnExtractor<F>
where
    F: Fn(&QueueMessage) -> ExtractionFuture + Send + Sync + 'static,
{
    extractor: F,
}

impl<F> FnExtractor<F>
where
    F: Fn(&QueueMessage) -> ExtractionFuture + Send + Sync + 'static,
{
    pub fn new(extractor: F) -> Self {
        Self { extractor }
    }
}

impl<F> EventExtractor for FnExtractor<F>
where
    F: Fn(&QueueMessage) -> ExtractionFuture + Send + Sync + 'static,
{
    fn process_email(&self, message: &QueueMessage) -> ExtractionFuture {
        (self.extractor)(message)
    }
}
