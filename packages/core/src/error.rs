//! Error types for the scheduling core.

use thiserror::Error;

/// Errors raised by the recurrence and conflict engines.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// A recurrence description could not be parsed.
    #[error("Malformed recurrence rule: {0}")]
    MalformedRule(String),

    /// The calendar source failed; no partial result is produced.
    #[error("Calendar source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Result type alias for calendar operations.
pub type CalendarResult<T> = Result<T, CalendarError>;

/// Errors raised by message broker implementations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Queue not declared: {0}")]
    NotDeclared(String),

    #[error("Broker connection is closed")]
    Closed,

    #[error("Unknown delivery tag: {0}")]
    UnknownDelivery(String),

    /// The broker refused the publish.
    #[error("Publish rejected: {0}")]
    Rejected(String),

    /// Storage or transport failure in the broker backend.
    #[error("Broker backend error: {0}")]
    Backend(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed reading {var}: {source}")]
    Env {
        var: &'static str,
        #[source]
        source: std::env::VarError,
    },
}
