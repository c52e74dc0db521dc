//! Actor system for the email pipeline.
//!
//! This crate provides the Ractor-based consumers that turn queued emails
//! into calendar events, with bounded retry and dead-letter routing.
//!
//! # Architecture
//!
//! - `PipelineSupervisor` - Owns the consumer pool, restarts failed consumers
//!   and broadcasts pipeline events
//! - `ConsumerActor` - Fetches from the work queue and settles each delivery
//! - `EmailPipeline` - Handle for publishing, statistics and shutdown
//!
//! # Usage
//!
//! ```ignore
//! use actors::{EmailPipeline, FnExtractor, Extraction};
//!
//! let extractor = FnExtractor::new(|message| {
//!     let user = message.user_id.clone();
//!     Box::pin(async move { Ok(Extraction::new(format!("Handled email for {user}"))) })
//! });
//! let pipeline = EmailPipeline::start(config, broker, Arc::new(extractor)).await?;
//! pipeline.publish_email_event("Lunch on Friday at noon", "user-1").await?;
//! ```

mod consumer_actor;
mod error;
mod extractor;
mod init;
mod messages;
mod pipeline;
mod scheduling;
mod supervisor;

pub use consumer_actor::ConsumerActor;
pub use error::PipelineError;
pub use extractor::{EventExtractor, Extraction, ExtractionFuture, ExtractionResult, FnExtractor};
pub use init::{start_pipeline, start_pipeline_from_env};
pub use messages::{ConsumerMessage, SupervisorMessage};
pub use pipeline::{EmailPipeline, EmailPublisher};
pub use scheduling::{EventParser, ParseFuture, SchedulingExtractor};
pub use supervisor::PipelineSupervisor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
