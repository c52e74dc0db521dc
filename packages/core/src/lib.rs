//! Core domain types for the email-to-calendar scheduler.
//!
//! This crate contains everything that does not need a database or actors:
//! - Recurrence rule parsing and expansion
//! - Conflict detection and free-slot search against a calendar source
//! - The message broker contract, an in-memory broker and the queue payload
//! - Pipeline configuration and events

mod broker;
mod config;
mod conflict;
mod error;
mod event;
mod events;
mod memory_broker;
mod message;
mod recurrence;
mod slot;
mod source;
mod timezone;

pub use broker::{BrokerFuture, BrokerResult, Delivery, DeliveryTag, MessageBroker, Publishing};
pub use config::QueueConfig;
pub use conflict::ConflictEngine;
pub use error::{BrokerError, CalendarError, CalendarResult, ConfigError};
pub use event::{CalendarEvent, ConflictResult, WorkingDay, WorkingHours};
pub use events::{DeadLetterReason, PipelineEvent, PipelineStats};
pub use memory_broker::MemoryBroker;
pub use message::{MESSAGE_CONTENT_TYPE, QueueMessage};
pub use recurrence::{Frequency, RULE_PREFIX, RecurrenceRule, expand_rule};
pub use slot::{TimeRange, TimeSlot, merge_slots};
pub use source::{CalendarSource, MemoryCalendar, SourceFuture};
pub use timezone::guess_timezone;
