//! Event types for pipeline observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::DeliveryTag;

/// Why a message ended up on the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The payload did not decode as a queue message. No retry was spent.
    UnparseableMessage { error: String },
    /// Extraction kept failing until the retry budget ran out.
    ExtractionFailed { error: String, attempts: u32 },
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeadLetterReason::UnparseableMessage { error } => {
                write!(f, "unparseable message: {error}")
            }
            DeadLetterReason::ExtractionFailed { error, attempts } => {
                write!(f, "extraction failed after {attempts} attempts: {error}")
            }
        }
    }
}

/// Events emitted by the email pipeline as messages move through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    // Producer events
    /// A new message was put on the work queue.
    Published {
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    // Message events
    /// A delivery was taken off the work queue.
    Received {
        delivery: DeliveryTag,
        worker_id: String,
        redelivered: bool,
        timestamp: DateTime<Utc>,
    },
    /// Extraction succeeded and the delivery was acknowledged.
    Acknowledged {
        delivery: DeliveryTag,
        user_id: String,
        retry_count: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Extraction failed and a republish is scheduled.
    RetryScheduled {
        delivery: DeliveryTag,
        user_id: String,
        retry_count: u32,
        error: String,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The retried copy was published and the original acknowledged.
    Requeued {
        delivery: DeliveryTag,
        user_id: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// The delivery was returned to the broker unacknowledged.
    Returned {
        delivery: DeliveryTag,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The raw payload went to the dead-letter queue.
    DeadLettered {
        delivery: DeliveryTag,
        reason: DeadLetterReason,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    ConsumerStarted {
        worker_id: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    ConsumerStopped {
        worker_id: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A broker call failed outside of message handling.
    BrokerFailure {
        worker_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::Published { timestamp, .. } => *timestamp,
            PipelineEvent::Received { timestamp, .. } => *timestamp,
            PipelineEvent::Acknowledged { timestamp, .. } => *timestamp,
            PipelineEvent::RetryScheduled { timestamp, .. } => *timestamp,
            PipelineEvent::Requeued { timestamp, .. } => *timestamp,
            PipelineEvent::Returned { timestamp, .. } => *timestamp,
            PipelineEvent::DeadLettered { timestamp, .. } => *timestamp,
            PipelineEvent::ConsumerStarted { timestamp, .. } => *timestamp,
            PipelineEvent::ConsumerStopped { timestamp, .. } => *timestamp,
            PipelineEvent::BrokerFailure { timestamp, .. } => *timestamp,
        }
    }

    /// The delivery this event is about, if any.
    pub fn delivery(&self) -> Option<DeliveryTag> {
        match self {
            PipelineEvent::Received { delivery, .. }
            | PipelineEvent::Acknowledged { delivery, .. }
            | PipelineEvent::RetryScheduled { delivery, .. }
            | PipelineEvent::Requeued { delivery, .. }
            | PipelineEvent::Returned { delivery, .. }
            | PipelineEvent::DeadLettered { delivery, .. } => Some(*delivery),
            _ => None,
        }
    }

    /// Short description for logging.
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::Published { user_id, .. } => format!("Email for {user_id} published"),
            PipelineEvent::Received {
                delivery,
                worker_id,
                redelivered,
                ..
            } => {
                let again = if *redelivered { " (redelivered)" } else { "" };
                format!("Delivery {delivery} received by {worker_id}{again}")
            }
            PipelineEvent::Acknowledged {
                delivery,
                duration_ms,
                ..
            } => format!("Delivery {delivery} acknowledged in {duration_ms}ms"),
            PipelineEvent::RetryScheduled {
                delivery,
                retry_count,
                error,
                ..
            } => format!("Delivery {delivery} failed: {error} (retry {retry_count} scheduled)"),
            PipelineEvent::Requeued {
                delivery,
                retry_count,
                ..
            } => format!("Delivery {delivery} requeued as retry {retry_count}"),
            PipelineEvent::Returned {
                delivery, error, ..
            } => format!("Delivery {delivery} returned to broker: {error}"),
            PipelineEvent::DeadLettered {
                delivery, reason, ..
            } => format!("Delivery {delivery} dead-lettered: {reason}"),
            PipelineEvent::ConsumerStarted {
                worker_id, queue, ..
            } => format!("Consumer {worker_id} started on {queue}"),
            PipelineEvent::ConsumerStopped {
                worker_id, queue, ..
            } => format!("Consumer {worker_id} stopped on {queue}"),
            PipelineEvent::BrokerFailure {
                worker_id, error, ..
            } => format!("Consumer {worker_id} broker failure: {error}"),
        }
    }
}

/// Running totals of pipeline events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineStats {
    pub published: u64,
    pub received: u64,
    pub acknowledged: u64,
    pub retries_scheduled: u64,
    pub requeued: u64,
    pub returned: u64,
    pub dead_lettered: u64,
    /// Dead-lettered without a retry because the payload did not decode.
    pub unparseable: u64,
    pub broker_failures: u64,
}

impl PipelineStats {
    /// Fold one event into the totals.
    pub fn record(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Published { .. } => self.published += 1,
            PipelineEvent::Received { .. } => self.received += 1,
            PipelineEvent::Acknowledged { .. } => self.acknowledged += 1,
            PipelineEvent::RetryScheduled { .. } => self.retries_scheduled += 1,
            PipelineEvent::Requeued { .. } => self.requeued += 1,
            PipelineEvent::Returned { .. } => self.returned += 1,
            PipelineEvent::DeadLettered { reason, .. } => {
                self.dead_lettered += 1;
                if matches!(reason, DeadLetterReason::UnparseableMessage { .. }) {
                    self.unparseable += 1;
                }
            }
            PipelineEvent::BrokerFailure { .. } => self.broker_failures += 1,
            PipelineEvent::ConsumerStarted { .. } | PipelineEvent::ConsumerStopped { .. } => {}
        }
    }

    /// Deliveries received but not yet settled.
    pub fn in_progress(&self) -> u64 {
        self.received
            .saturating_sub(self.acknowledged + self.requeued + self.returned + self.dead_lettered)
    }

    /// Share of finished messages that were acknowledged, as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.acknowledged + self.dead_lettered;
        if total == 0 {
            None
        } else {
            Some((self.acknowledged as f64 / total as f64) * 100.0)
        }
    }
}
