//! Extractor that books parsed emails into a calendar.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use calendar_core::{CalendarEvent, ConflictEngine, QueueMessage};
use serde_json::json;

use crate::extractor::{EventExtractor, Extraction, ExtractionFuture};

/// Future type for event parsers.
pub type ParseFuture<'a> = Pin<Box<dyn Future<Output = Result<CalendarEvent, String>> + Send + 'a>>;

/// Turns an email body into a candidate event. MIME decoding and language
/// understanding live behind this trait.
pub trait EventParser: Send + Sync + 'static {
    fn parse_email<'a>(&'a self, email_content: &'a str, user_id: &'a str) -> ParseFuture<'a>;
}

/// Parses an email, checks it for conflicts, and creates the event when the
/// slot is free.
///
/// A conflict is a successful extraction: the alternatives are reported in
/// the output instead of being retried.
#[derive(Clone)]
pub struct SchedulingExtractor {
    parser: Arc<dyn EventParser>,
    engine: ConflictEngine,
}

impl SchedulingExtractor {
    pub fn new(parser: Arc<dyn EventParser>, engine: ConflictEngine) -> Self {
        Self { parser, engine }
    }

    async fn schedule(&self, message: QueueMessage) -> Result<Extraction, String> {
        let mut event = self
            .parser
            .parse_email(&message.email_content, &message.user_id)
            .await?;
        event.attendees.insert(message.user_id.clone());

        let result = self
            .engine
            .check_conflicts(&event, &event.attendees)
            .await
            .map_err(|e| e.to_string())?;

        if result.has_conflict {
            let summary = match &result.conflicting_event {
                Some(other) => format!("'{}' conflicts with '{}'", event.title, other.title),
                None => format!("'{}' conflicts with an existing event", event.title),
            };
            tracing::info!("{} for user {}", summary, message.user_id);
            let output = serde_json::to_value(&result).map_err(|e| e.to_string())?;
            return Ok(Extraction::with_output(summary, output));
        }

        let created = self
            .engine
            .source()
            .create_event(event)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!("Created event {} for user {}", created.id, message.user_id);

        Ok(Extraction::with_output(
            format!("Created '{}'", created.title),
            json!({ "created": created }),
        ))
    }
}

impl EventExtractor for SchedulingExtractor {
    fn process_email(&self, message: &QueueMessage) -> ExtractionFuture {
        let this = self.clone();
        let message = message.clone();
        Box::pin(async move { this.schedule(message).await })
    }
}
