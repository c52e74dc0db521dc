//! Repository implementations for database operations.

mod message_repo;
mod queue_repo;

pub use message_repo::{MessageRepository, MessageState, StoredMessage};
pub use queue_repo::{QueueRecord, QueueRepository};
